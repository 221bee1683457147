//! 投影状态中的实体
//!
//! 所有实体都是不可变快照：状态变化时整体替换，从不原地修改。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::value_objects::{ChannelId, UserId};

/// 身份服务返回的用户资料。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(alias = "profilePicture", default)]
    pub avatar_ref: String,
}

/// 用户及其在线状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_ref: String,
    pub online: bool,
}

/// 用户同时打开的会话数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub user_id: UserId,
    pub connection_count: u32,
}

impl Connection {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            connection_count: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_count > 0
    }
}

/// 频道。成员在创建时确定，之后不再变化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub channel_id: ChannelId,
    pub member_user_ids: BTreeSet<UserId>,
}

impl Channel {
    pub fn public() -> Self {
        Self {
            channel_id: ChannelId::public(),
            member_user_ids: BTreeSet::new(),
        }
    }

    pub fn has_member(&self, user_id: &UserId) -> bool {
        self.member_user_ids.contains(user_id)
    }

    /// 公共频道对所有用户可见，其余频道只对成员可见。
    pub fn is_visible_to(&self, user_id: &UserId) -> bool {
        self.channel_id.is_public() || self.has_member(user_id)
    }
}
