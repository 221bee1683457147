use std::sync::Arc;

use domain::{
    ChannelCreated, ChannelId, Command, DomainEvent, MessageId, MessageReceived, UserId,
};

use crate::clock::{Clock, IdGenerator};

/// 把已认证用户的命令转换为领域事件，负责生成 ID 和时间戳
pub struct CommandTranslator {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl CommandTranslator {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { clock, ids }
    }

    /// 未知命令返回 `None`
    pub fn translate(&self, user_id: &UserId, command: Command) -> Option<DomainEvent> {
        match command {
            Command::CreateChannel { user_ids } => {
                let mut member_user_ids: std::collections::BTreeSet<UserId> =
                    user_ids.into_iter().collect();
                member_user_ids.insert(user_id.clone());
                Some(DomainEvent::ChannelCreated(ChannelCreated {
                    channel_id: ChannelId::new(self.ids.next_id()),
                    member_user_ids,
                }))
            }
            Command::SendMessage {
                channel_id,
                content,
            } => Some(DomainEvent::MessageReceived(MessageReceived {
                message_id: MessageId::new(self.ids.next_id()),
                channel_id,
                user_id: user_id.clone(),
                content,
                timestamp: self.clock.now(),
            })),
            Command::Unrecognized => None,
        }
    }
}
