//! 领域事件定义
//!
//! 持久化到事件日志的事件使用 `{ "type": "<KIND>", ...字段 }` 的 JSON 形式，
//! 字段名为 camelCase。`FeedEvent` 只用于向客户端投递，不持久化。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entities::{Channel, User, UserProfile};
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ChannelId, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLoggedIn {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(alias = "profilePicture", default)]
    pub avatar_ref: String,
}

impl From<UserProfile> for UserLoggedIn {
    fn from(profile: UserProfile) -> Self {
        Self {
            user_id: profile.user_id,
            display_name: profile.display_name,
            avatar_ref: profile.avatar_ref,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLoggedOut {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCreated {
    pub channel_id: ChannelId,
    #[serde(alias = "userIds")]
    pub member_user_ids: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceived {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub content: String,
    pub timestamp: Timestamp,
}

/// 持久化的领域事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    UserLoggedIn(UserLoggedIn),
    UserLoggedOut(UserLoggedOut),
    ChannelCreated(ChannelCreated),
    MessageReceived(MessageReceived),
    /// 进程重启标记，用于归零瞬态计数
    ServiceStarted,
    /// 日志中出现的未知事件类型（来自更新的版本）
    #[serde(other)]
    Unrecognized,
}

impl DomainEvent {
    /// 获取事件类型名称（与 JSON 中的 `type` 一致）
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::UserLoggedIn(_) => "USER_LOGGED_IN",
            DomainEvent::UserLoggedOut(_) => "USER_LOGGED_OUT",
            DomainEvent::ChannelCreated(_) => "CHANNEL_CREATED",
            DomainEvent::MessageReceived(_) => "MESSAGE_RECEIVED",
            DomainEvent::ServiceStarted => "SERVICE_STARTED",
            DomainEvent::Unrecognized => "UNRECOGNIZED",
        }
    }

    /// 生命周期事件走全局有序的服务流，消息事件走频道子流
    pub fn is_lifecycle(&self) -> bool {
        !matches!(
            self,
            DomainEvent::MessageReceived(_) | DomainEvent::Unrecognized
        )
    }

    /// 消息事件的目标频道
    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            DomainEvent::MessageReceived(message) => Some(&message.channel_id),
            DomainEvent::ChannelCreated(created) => Some(&created.channel_id),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            DomainEvent::UserLoggedIn(event) => Some(&event.user_id),
            DomainEvent::UserLoggedOut(event) => Some(&event.user_id),
            DomainEvent::MessageReceived(event) => Some(&event.user_id),
            _ => None,
        }
    }

    pub fn to_payload(&self) -> DomainResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(DomainError::from)
    }

    pub fn from_payload(payload: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(payload).map_err(DomainError::from)
    }
}

impl From<UserLoggedIn> for DomainEvent {
    fn from(event: UserLoggedIn) -> Self {
        DomainEvent::UserLoggedIn(event)
    }
}

impl From<UserLoggedOut> for DomainEvent {
    fn from(event: UserLoggedOut) -> Self {
        DomainEvent::UserLoggedOut(event)
    }
}

impl From<ChannelCreated> for DomainEvent {
    fn from(event: ChannelCreated) -> Self {
        DomainEvent::ChannelCreated(event)
    }
}

impl From<MessageReceived> for DomainEvent {
    fn from(event: MessageReceived) -> Self {
        DomainEvent::MessageReceived(event)
    }
}

/// 投递给单个连接的事件，由投影状态派生，不持久化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedEvent {
    MessageReceived(MessageReceived),
    OnlineUsersChanged { users: Vec<User> },
    AvailableChannelsChanged { channels: Vec<Channel> },
}

impl FeedEvent {
    pub fn to_json(&self) -> DomainResult<String> {
        serde_json::to_string(self).map_err(DomainError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = DomainEvent::MessageReceived(MessageReceived {
            message_id: MessageId::new("m1"),
            channel_id: ChannelId::public(),
            user_id: UserId::new("a"),
            content: "hello".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "MESSAGE_RECEIVED");
        assert_eq!(value["messageId"], "m1");
        assert_eq!(value["channelId"], "public");
        assert_eq!(value["userId"], "a");
    }

    #[test]
    fn test_service_started_has_no_fields() {
        let value = serde_json::to_value(DomainEvent::ServiceStarted).unwrap();
        assert_eq!(value, json!({ "type": "SERVICE_STARTED" }));
    }

    #[test]
    fn test_unknown_event_type_decodes_as_unrecognized() {
        let event = DomainEvent::from_payload(br#"{"type":"USER_RENAMED","userId":"a"}"#).unwrap();
        assert_eq!(event, DomainEvent::Unrecognized);
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let result = DomainEvent::from_payload(b"{not json");
        assert!(matches!(result, Err(DomainError::MalformedPayload { .. })));

        let result = DomainEvent::from_payload(br#"{"type":"USER_LOGGED_OUT"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_channel_created_accepts_legacy_user_ids_field() {
        let event =
            DomainEvent::from_payload(br#"{"type":"CHANNEL_CREATED","channelId":"c1","userIds":["a","b"]}"#)
                .unwrap();
        match event {
            DomainEvent::ChannelCreated(created) => {
                assert_eq!(created.member_user_ids.len(), 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_feed_event_wire_format() {
        let event = FeedEvent::OnlineUsersChanged { users: Vec::new() };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({ "type": "ONLINE_USERS_CHANGED", "users": [] }));
    }

    #[test]
    fn test_lifecycle_partitioning() {
        assert!(DomainEvent::ServiceStarted.is_lifecycle());
        assert!(DomainEvent::UserLoggedOut(UserLoggedOut {
            user_id: UserId::new("a")
        })
        .is_lifecycle());
        assert!(!DomainEvent::Unrecognized.is_lifecycle());
    }
}
