//! 事件授权规则
//!
//! 事件写入日志前，基于当前投影快照做准入检查；回放日志时，
//! 由 `ReplayPolicy` 决定哪些历史事件仍值得投递。

use chrono::Duration;

use crate::events::{ChannelCreated, DomainEvent, MessageReceived, UserLoggedOut};
use crate::state::ProjectedState;
use crate::value_objects::Timestamp;

/// 事件准入规则
pub struct EventAuthorizer;

impl EventAuthorizer {
    /// 纯谓词：事件在当前状态下是否允许持久化
    pub fn authorize(state: &ProjectedState, event: &DomainEvent) -> bool {
        Self::check(state, event).is_ok()
    }

    /// 与 `authorize` 相同，拒绝时给出原因（用于日志）
    pub fn check(state: &ProjectedState, event: &DomainEvent) -> Result<(), &'static str> {
        match event {
            DomainEvent::UserLoggedIn(_) => Ok(()),
            DomainEvent::UserLoggedOut(event) => Self::check_logged_out(state, event),
            DomainEvent::ChannelCreated(event) => Self::check_channel_created(state, event),
            DomainEvent::MessageReceived(event) => Self::check_message_received(state, event),
            DomainEvent::ServiceStarted => Ok(()),
            DomainEvent::Unrecognized => Err("unrecognized event type"),
        }
    }

    fn check_logged_out(state: &ProjectedState, event: &UserLoggedOut) -> Result<(), &'static str> {
        if state.users.contains_key(&event.user_id) {
            Ok(())
        } else {
            Err("logout without a prior login")
        }
    }

    fn check_channel_created(
        state: &ProjectedState,
        event: &ChannelCreated,
    ) -> Result<(), &'static str> {
        if state.has_channel(&event.channel_id) {
            Err("channel id already exists")
        } else {
            Ok(())
        }
    }

    fn check_message_received(
        state: &ProjectedState,
        event: &MessageReceived,
    ) -> Result<(), &'static str> {
        if !state.has_channel(&event.channel_id) {
            return Err("target channel does not exist");
        }
        if event.content.trim().is_empty() {
            return Err("message content is empty");
        }
        if event.message_id.is_empty() {
            return Err("message id is empty");
        }
        Ok(())
    }
}

/// 日志回放过滤策略，只作用于追赶阶段
#[derive(Debug, Clone, Copy)]
pub struct ReplayPolicy {
    pub freshness_window: Duration,
}

impl ReplayPolicy {
    pub const DEFAULT_FRESHNESS_SECS: i64 = 3600;

    pub fn new(freshness_window: Duration) -> Self {
        Self { freshness_window }
    }

    /// 早于新鲜度窗口的消息不再回放；未知类型从不回放
    pub fn is_replayable(&self, event: &DomainEvent, now: Timestamp) -> bool {
        match event {
            DomainEvent::MessageReceived(message) => {
                now.signed_duration_since(message.timestamp) <= self.freshness_window
            }
            DomainEvent::UserLoggedIn(_)
            | DomainEvent::UserLoggedOut(_)
            | DomainEvent::ChannelCreated(_)
            | DomainEvent::ServiceStarted => true,
            DomainEvent::Unrecognized => false,
        }
    }
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self::new(Duration::seconds(Self::DEFAULT_FRESHNESS_SECS))
    }
}
