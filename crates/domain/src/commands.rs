//! 客户端通过长连接发送的命令

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ChannelId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    SendMessage {
        #[serde(rename = "channelId")]
        channel_id: ChannelId,
        content: String,
    },
    CreateChannel {
        #[serde(rename = "userIds", default)]
        user_ids: Vec<UserId>,
    },
    #[serde(other)]
    Unrecognized,
}

impl Command {
    pub fn parse(text: &str) -> DomainResult<Self> {
        serde_json::from_str(text).map_err(DomainError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_message() {
        let command = Command::parse(r#"{"type":"SEND_MESSAGE","channelId":"public","content":"hi"}"#)
            .unwrap();
        assert_eq!(
            command,
            Command::SendMessage {
                channel_id: ChannelId::public(),
                content: "hi".into(),
            }
        );
    }

    #[test]
    fn test_parse_create_channel() {
        let command = Command::parse(r#"{"type":"CREATE_CHANNEL","userIds":["b"]}"#).unwrap();
        assert_eq!(
            command,
            Command::CreateChannel {
                user_ids: vec![UserId::new("b")],
            }
        );
    }

    #[test]
    fn test_unknown_command_type() {
        let command = Command::parse(r#"{"type":"DELETE_CHANNEL","channelId":"c1"}"#).unwrap();
        assert_eq!(command, Command::Unrecognized);
    }

    #[test]
    fn test_non_json_is_rejected() {
        assert!(Command::parse("ping").is_err());
    }
}
