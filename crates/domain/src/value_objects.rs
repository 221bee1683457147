use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 公共频道的固定 ID，所有用户都能看到。
pub const PUBLIC_CHANNEL_ID: &str = "public";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// 拒绝空白标识符，用于处理外部输入。
            pub fn parse(id: impl Into<String>) -> Result<Self, DomainError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(DomainError::invalid_identifier($field, "cannot be empty"));
                }
                Ok(Self(id))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

string_id!(
    /// 用户唯一标识，由身份服务分配。
    UserId,
    "userId"
);

string_id!(
    /// 频道唯一标识。
    ChannelId,
    "channelId"
);

string_id!(
    /// 消息唯一标识，同时作为消息事件在日志中的事件 ID。
    MessageId,
    "messageId"
);

impl ChannelId {
    pub fn public() -> Self {
        Self(PUBLIC_CHANNEL_ID.to_owned())
    }

    pub fn is_public(&self) -> bool {
        self.0 == PUBLIC_CHANNEL_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_channel_id() {
        assert!(ChannelId::public().is_public());
        assert!(!ChannelId::new("c1").is_public());
    }

    #[test]
    fn test_parse_rejects_blank_ids() {
        assert!(UserId::parse("  ").is_err());
        assert_eq!(UserId::parse("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&MessageId::new("m-1")).unwrap();
        assert_eq!(json, "\"m-1\"");
    }
}
