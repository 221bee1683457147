//! 事件溯源聊天系统核心领域模型
//!
//! 包含领域事件、用户命令、投影状态，以及两个纯函数组件：
//! 事件授权器（持久化前的准入检查）和状态投影器（事件日志 → 当前状态）。
//! 本 crate 不做任何 I/O。

pub mod authorizer;
pub mod commands;
pub mod entities;
pub mod errors;
pub mod events;
pub mod projector;
pub mod state;
pub mod value_objects;

// 重新导出常用类型
pub use authorizer::{EventAuthorizer, ReplayPolicy};
pub use commands::Command;
pub use entities::{Channel, Connection, User, UserProfile};
pub use errors::{DomainError, DomainResult};
pub use events::{
    ChannelCreated, DomainEvent, FeedEvent, MessageReceived, UserLoggedIn, UserLoggedOut,
};
pub use projector::StateProjector;
pub use state::ProjectedState;
pub use value_objects::{ChannelId, MessageId, Timestamp, UserId, PUBLIC_CHANNEL_ID};
