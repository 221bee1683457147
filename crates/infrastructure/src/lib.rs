//! 基础设施层实现。
//!
//! 提供事件日志存储（进程内 / Redis Streams）和身份服务客户端，
//! 实现应用层定义的接口。

pub mod http_identity;
pub mod memory_store;
pub mod redis_store;

pub use http_identity::HttpIdentityProvider;
pub use memory_store::MemoryLogStore;
pub use redis_store::{RedisLogStore, RedisLogStoreConfig};
