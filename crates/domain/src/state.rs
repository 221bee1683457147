use std::collections::{BTreeMap, BTreeSet};

use crate::entities::{Channel, Connection, User};
use crate::value_objects::{ChannelId, UserId};

/// 事件日志的完整投影。
///
/// 值类型：投影器每处理一个事件就生成一个新值，读者总能看到完整一致的快照。
/// 使用有序集合，保证相同事件序列得到逐位相同的状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedState {
    pub connections: BTreeMap<UserId, Connection>,
    pub users: BTreeMap<UserId, User>,
    pub channels: BTreeMap<ChannelId, Channel>,
    /// 当前应当持有实时消息订阅的频道
    pub activations: BTreeSet<ChannelId>,
}

impl ProjectedState {
    /// 空日志对应的初始状态：只有隐式存在、始终激活的公共频道
    pub fn initial() -> Self {
        let public = Channel::public();
        let mut channels = BTreeMap::new();
        let mut activations = BTreeSet::new();
        activations.insert(public.channel_id.clone());
        channels.insert(public.channel_id.clone(), public);

        Self {
            connections: BTreeMap::new(),
            users: BTreeMap::new(),
            channels,
            activations,
        }
    }

    pub fn connection_count(&self, user_id: &UserId) -> u32 {
        self.connections
            .get(user_id)
            .map(|connection| connection.connection_count)
            .unwrap_or(0)
    }

    pub fn user(&self, user_id: &UserId) -> Option<&User> {
        self.users.get(user_id)
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Option<&Channel> {
        self.channels.get(channel_id)
    }

    pub fn has_channel(&self, channel_id: &ChannelId) -> bool {
        self.channels.contains_key(channel_id)
    }

    pub fn is_activated(&self, channel_id: &ChannelId) -> bool {
        self.activations.contains(channel_id)
    }

    /// 全部已知用户（含在线标记），按用户 ID 排序
    pub fn user_list(&self) -> Vec<User> {
        self.users.values().cloned().collect()
    }

    /// 用户可见的频道：公共频道和其所属频道
    pub fn visible_channels(&self, user_id: &UserId) -> Vec<Channel> {
        self.channels
            .values()
            .filter(|channel| channel.is_visible_to(user_id))
            .cloned()
            .collect()
    }

    /// 用户可见且已激活的频道
    pub fn active_channels_for(&self, user_id: &UserId) -> BTreeSet<ChannelId> {
        self.channels
            .values()
            .filter(|channel| channel.is_visible_to(user_id))
            .filter(|channel| self.activations.contains(&channel.channel_id))
            .map(|channel| channel.channel_id.clone())
            .collect()
    }
}

impl Default for ProjectedState {
    fn default() -> Self {
        Self::initial()
    }
}
