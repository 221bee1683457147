//! 聊天服务配置
//!
//! 加载顺序：内置默认值 -> 可选的 YAML 文件 -> `CHAT_` 前缀环境变量
//! （嵌套字段用 `__` 分隔，例如 `CHAT_SERVER__PORT=4100`）。

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 全局配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub server: ServerConfig,
    pub log_store: LogStoreConfig,
    pub identity: IdentityConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4000,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogStoreBackend {
    /// 进程内存储，重启即丢失，适合本地开发
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStoreConfig {
    pub backend: LogStoreBackend,
    pub redis_url: Option<String>,
    pub service_stream: String,
    pub channel_stream_prefix: String,
    pub read_batch: usize,
    pub block_ms: u64,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            backend: LogStoreBackend::Memory,
            redis_url: None,
            service_stream: "messageService".into(),
            channel_stream_prefix: "messageService/channel/".into(),
            read_batch: 256,
            block_ms: 5000,
        }
    }
}

impl LogStoreConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: "http://micro-auth:3000".into(),
            timeout_ms: 5000,
        }
    }
}

impl IdentityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 每个频道保留的最近消息条数
    pub replay_buffer: usize,
    /// 回放历史时只保留这个时间窗口内的消息
    pub freshness_window_secs: u64,
    pub liveness_probe_secs: u64,
    pub dedup_window: usize,
    pub outbound_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            replay_buffer: 500,
            freshness_window_secs: 3600,
            liveness_probe_secs: 10,
            dedup_window: 1024,
            outbound_buffer: 500,
        }
    }
}

impl EngineConfig {
    pub fn liveness_probe(&self) -> Duration {
        Duration::from_secs(self.liveness_probe_secs)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }
}

impl ChatConfig {
    /// 合并默认值、可选配置文件和环境变量，并校验结果
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: ChatConfig = Self::figment(path)
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(ChatConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed("CHAT_").split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host cannot be empty".into()));
        }

        let store = &self.log_store;
        if store.service_stream.trim().is_empty() || store.channel_stream_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("stream names cannot be empty".into()));
        }
        if store.read_batch == 0 {
            return Err(ConfigError::Invalid("log_store.read_batch must be greater than 0".into()));
        }
        if store.backend == LogStoreBackend::Redis
            && store.redis_url.as_deref().map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "log_store.redis_url is required for the redis backend".into(),
            ));
        }

        let engine = &self.engine;
        if engine.replay_buffer == 0 || engine.dedup_window == 0 || engine.outbound_buffer == 0 {
            return Err(ConfigError::Invalid("engine buffers must be greater than 0".into()));
        }
        if engine.liveness_probe_secs == 0 {
            return Err(ConfigError::Invalid(
                "engine.liveness_probe_secs must be greater than 0".into(),
            ));
        }

        if self.identity.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("identity.base_url cannot be empty".into()));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = ChatConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_address(), "127.0.0.1:4000");
        assert_eq!(config.log_store.service_stream, "messageService");
        assert_eq!(config.engine.replay_buffer, 500);
        assert_eq!(config.engine.liveness_probe(), Duration::from_secs(10));
    }

    #[test]
    fn test_yaml_file_and_env_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "chat.yaml",
                r#"
server:
  port: 4100
log_store:
  backend: redis
  redis_url: "redis://redis:6379"
engine:
  replay_buffer: 50
"#,
            )?;
            jail.set_env("CHAT_SERVER__HOST", "0.0.0.0");
            jail.set_env("CHAT_ENGINE__LIVENESS_PROBE_SECS", "3");

            let config = ChatConfig::load(Some(Path::new("chat.yaml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.server.bind_address(), "0.0.0.0:4100");
            assert_eq!(config.log_store.backend, LogStoreBackend::Redis);
            assert_eq!(config.log_store.redis_url.as_deref(), Some("redis://redis:6379"));
            assert_eq!(config.engine.replay_buffer, 50);
            assert_eq!(config.engine.liveness_probe_secs, 3);
            // 未覆盖的字段保留默认值
            assert_eq!(config.engine.dedup_window, 1024);
            assert_eq!(config.identity.base_url, "http://micro-auth:3000");
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        Jail::expect_with(|jail| {
            jail.set_env("CHAT_ENGINE__REPLAY_BUFFER", "0");
            let result = ChatConfig::load(None);
            assert!(matches!(result, Err(ConfigError::Invalid(_))));
            Ok(())
        });
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let mut config = ChatConfig::default();
        config.log_store.backend = LogStoreBackend::Redis;
        assert!(config.validate().is_err());

        config.log_store.redis_url = Some("redis://127.0.0.1:6379".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_probe_and_empty_streams() {
        let mut config = ChatConfig::default();
        config.engine.liveness_probe_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ChatConfig::default();
        config.log_store.channel_stream_prefix = " ".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stream names"));
    }
}
