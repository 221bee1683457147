//! 主应用程序入口
//!
//! 加载配置、连接事件日志和身份服务、启动聊天引擎与 Axum 服务。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use application::{
    ChatEngine, EngineDependencies, EngineSettings, LogStore, SessionSettings, StreamKeys,
};
use config::{ChatConfig, LogStoreBackend};
use infrastructure::{HttpIdentityProvider, MemoryLogStore, RedisLogStore, RedisLogStoreConfig};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 配置文件路径可选，来自 CHAT_CONFIG_FILE
    let config_path = std::env::var_os("CHAT_CONFIG_FILE").map(PathBuf::from);
    let config = ChatConfig::load(config_path.as_deref()).context("加载配置失败")?;

    let store = connect_log_store(&config).await?;
    let identity = HttpIdentityProvider::new(
        config.identity.base_url.clone(),
        config.identity.timeout(),
    )
    .context("创建身份服务客户端失败")?;

    let engine = ChatEngine::start(
        EngineDependencies::new(store, Arc::new(identity)),
        engine_settings(&config)?,
    )
    .await
    .context("启动聊天引擎失败")?;

    let app = router(AppState::new(engine.clone()));
    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("绑定地址失败: {address}"))?;

    tracing::info!("聊天服务器启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine.clone()))
        .await?;

    tracing::info!("聊天服务器已停止");
    Ok(())
}

async fn connect_log_store(config: &ChatConfig) -> anyhow::Result<Arc<dyn LogStore>> {
    let store: Arc<dyn LogStore> = match config.log_store.backend {
        LogStoreBackend::Memory => {
            tracing::warn!("使用进程内事件日志，重启后历史将丢失");
            Arc::new(MemoryLogStore::new())
        }
        LogStoreBackend::Redis => {
            let url = config
                .log_store
                .redis_url
                .clone()
                .context("redis 后端需要 log_store.redis_url")?;
            let store = RedisLogStore::connect(RedisLogStoreConfig {
                url,
                read_batch: config.log_store.read_batch,
                block: config.log_store.block(),
            })
            .await
            .context("连接 Redis 事件日志失败")?;
            Arc::new(store)
        }
    };
    Ok(store)
}

fn engine_settings(config: &ChatConfig) -> anyhow::Result<EngineSettings> {
    let engine = &config.engine;
    let freshness_window = chrono::Duration::from_std(engine.freshness_window())
        .context("engine.freshness_window_secs 超出范围")?;

    Ok(EngineSettings {
        streams: StreamKeys::new(
            config.log_store.service_stream.clone(),
            config.log_store.channel_stream_prefix.clone(),
        ),
        replay_buffer: engine.replay_buffer,
        freshness_window,
        session: SessionSettings {
            liveness_probe: engine.liveness_probe(),
            dedup_window: engine.dedup_window,
            outbound_buffer: engine.outbound_buffer,
        },
    })
}

/// 已升级的 WebSocket 连接不会自行结束，收到信号后先关闭引擎
async fn shutdown_signal(engine: Arc<ChatEngine>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
    engine.shutdown().await;
}
