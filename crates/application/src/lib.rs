//! 应用层实现。
//!
//! 事件日志网关、投影任务、状态分发、频道订阅管理和连接会话，
//! 以及对外部适配器（日志存储、身份服务、传输层）的抽象。
//! `ChatEngine` 把它们组装成一个显式的上下文对象。

pub mod backoff;
pub mod channels;
pub mod clock;
pub mod distributor;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod log_store;
pub mod projection;
pub mod replay;
pub mod session;
pub mod translator;
pub mod transport;

pub use channels::{ChannelSubscriptionManager, ChannelView, MessageStream};
pub use clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
pub use distributor::{StateDistributor, StateSnapshot};
pub use engine::{ChatEngine, EngineDependencies, EngineSettings, CLOSE_GOING_AWAY};
pub use error::{ApplicationError, DeliveryError, IdentityError, LogStoreError};
pub use gateway::{EventLogGateway, EventSubscription, StreamKeys, SubscriptionItem, SubscriptionPhase};
pub use identity::{memory::MemoryIdentityProvider, IdentityProvider};
pub use log_store::{AppendAck, LogStore, NewRecord, RecordSubscription, StoreSignal, StoredRecord};
pub use replay::ReplayFeed;
pub use session::{ConnectionSession, SessionSettings};
pub use translator::CommandTranslator;
pub use transport::Transport;
