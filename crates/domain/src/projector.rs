//! 状态投影器
//!
//! `(state, event) → state'` 的纯折叠。由四个互相独立的子归约组成，
//! 每个子归约对所有事件类型都有定义（默认保持不变）。折叠内部不做任何 I/O，
//! 同一事件序列从初始状态回放总是得到相同的结果。

use std::collections::{BTreeMap, BTreeSet};

use crate::entities::{Channel, Connection, User};
use crate::events::DomainEvent;
use crate::state::ProjectedState;
use crate::value_objects::{ChannelId, UserId};

pub struct StateProjector;

impl StateProjector {
    pub fn reduce(state: &ProjectedState, event: &DomainEvent) -> ProjectedState {
        if let DomainEvent::Unrecognized = event {
            return state.clone();
        }

        let connections = reduce_connections(&state.connections, event);
        let users = reduce_users(&state.users, &connections, event);
        let channels = reduce_channels(&state.channels, event);
        let activations = compute_activations(&connections, &channels);

        ProjectedState {
            connections,
            users,
            channels,
            activations,
        }
    }

    /// 从初始状态折叠整段事件序列
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a DomainEvent>) -> ProjectedState {
        events
            .into_iter()
            .fold(ProjectedState::initial(), |state, event| {
                Self::reduce(&state, event)
            })
    }
}

fn reduce_connections(
    connections: &BTreeMap<UserId, Connection>,
    event: &DomainEvent,
) -> BTreeMap<UserId, Connection> {
    let mut next = connections.clone();
    match event {
        DomainEvent::ServiceStarted => {
            for connection in next.values_mut() {
                connection.connection_count = 0;
            }
        }
        DomainEvent::UserLoggedIn(login) => {
            let connection = next
                .entry(login.user_id.clone())
                .or_insert_with(|| Connection::new(login.user_id.clone()));
            connection.connection_count = connection.connection_count.saturating_add(1);
        }
        DomainEvent::UserLoggedOut(logout) => {
            if let Some(connection) = next.get_mut(&logout.user_id) {
                connection.connection_count = connection.connection_count.saturating_sub(1);
            }
        }
        _ => {}
    }
    next
}

/// 依赖本轮归约后的连接数：仍有其他会话时不把用户标记为离线
fn reduce_users(
    users: &BTreeMap<UserId, User>,
    next_connections: &BTreeMap<UserId, Connection>,
    event: &DomainEvent,
) -> BTreeMap<UserId, User> {
    let mut next = users.clone();
    match event {
        DomainEvent::ServiceStarted => {
            for user in next.values_mut() {
                user.online = false;
            }
        }
        DomainEvent::UserLoggedIn(login) => {
            next.insert(
                login.user_id.clone(),
                User {
                    user_id: login.user_id.clone(),
                    display_name: login.display_name.clone(),
                    avatar_ref: login.avatar_ref.clone(),
                    online: true,
                },
            );
        }
        DomainEvent::UserLoggedOut(logout) => {
            let disconnected = next_connections
                .get(&logout.user_id)
                .map(|connection| !connection.is_connected())
                .unwrap_or(true);
            if disconnected {
                if let Some(user) = next.get_mut(&logout.user_id) {
                    user.online = false;
                }
            }
        }
        _ => {}
    }
    next
}

fn reduce_channels(
    channels: &BTreeMap<ChannelId, Channel>,
    event: &DomainEvent,
) -> BTreeMap<ChannelId, Channel> {
    let mut next = channels.clone();
    if let DomainEvent::ChannelCreated(created) = event {
        // 成员在创建时固定，重复 ID 不覆盖已有频道
        next.entry(created.channel_id.clone())
            .or_insert_with(|| Channel {
                channel_id: created.channel_id.clone(),
                member_user_ids: created.member_user_ids.clone(),
            });
    }
    next
}

fn compute_activations(
    connections: &BTreeMap<UserId, Connection>,
    channels: &BTreeMap<ChannelId, Channel>,
) -> BTreeSet<ChannelId> {
    channels
        .values()
        .filter(|channel| {
            channel.channel_id.is_public()
                || channel.member_user_ids.iter().any(|member| {
                    connections
                        .get(member)
                        .map(Connection::is_connected)
                        .unwrap_or(false)
                })
        })
        .map(|channel| channel.channel_id.clone())
        .collect()
}
