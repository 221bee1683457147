//! 聊天引擎上下文
//!
//! 显式构造、显式启动和关闭，所有组件通过它共享，没有全局状态。

use std::sync::Arc;
use std::time::Duration;

use domain::{DomainEvent, ReplayPolicy};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channels::ChannelSubscriptionManager;
use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::distributor::{StateDistributor, StateSnapshot};
use crate::error::{ApplicationError, IdentityError};
use crate::gateway::{EventLogGateway, StreamKeys};
use crate::identity::IdentityProvider;
use crate::log_store::LogStore;
use crate::projection::ProjectionRunner;
use crate::replay::DEFAULT_REPLAY_CAPACITY;
use crate::session::{ConnectionSession, SessionContext, SessionRegistry, SessionSettings};
use crate::translator::CommandTranslator;
use crate::transport::Transport;

/// 服务关闭时发给客户端的关闭码
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub streams: StreamKeys,
    /// 每个频道消息源保留的最近消息数
    pub replay_buffer: usize,
    pub freshness_window: chrono::Duration,
    pub session: SessionSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            streams: StreamKeys::default(),
            replay_buffer: DEFAULT_REPLAY_CAPACITY,
            freshness_window: chrono::Duration::seconds(ReplayPolicy::DEFAULT_FRESHNESS_SECS),
            session: SessionSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn with_liveness_probe(mut self, period: Duration) -> Self {
        self.session.liveness_probe = period;
        self
    }
}

pub struct EngineDependencies {
    pub store: Arc<dyn LogStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl EngineDependencies {
    pub fn new(store: Arc<dyn LogStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
        }
    }
}

pub struct ChatEngine {
    identity: Arc<dyn IdentityProvider>,
    gateway: Arc<EventLogGateway>,
    distributor: StateDistributor,
    channels: Arc<ChannelSubscriptionManager>,
    sessions: SessionContext,
    cancel: CancellationToken,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ChatEngine {
    /// 写入 `ServiceStarted`，回放服务流直到追赶完成，然后开始调和频道消息源。
    /// 返回时引擎已可以接受连接。
    pub async fn start(
        deps: EngineDependencies,
        settings: EngineSettings,
    ) -> Result<Arc<Self>, ApplicationError> {
        let cancel = CancellationToken::new();
        let distributor = StateDistributor::new();
        let gateway = Arc::new(EventLogGateway::new(
            deps.store,
            settings.streams.clone(),
            distributor.clone(),
            Arc::clone(&deps.ids),
            Arc::clone(&deps.clock),
            ReplayPolicy::new(settings.freshness_window),
        ));

        gateway.append(&DomainEvent::ServiceStarted).await?;
        let subscription = gateway.subscribe_service(0).await?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let projection = tokio::spawn(
            ProjectionRunner::new(
                Arc::clone(&gateway),
                distributor.clone(),
                cancel.child_token(),
            )
            .run(subscription, ready_tx),
        );
        if ready_rx.await.is_err() {
            cancel.cancel();
            return Err(ApplicationError::EngineStopped);
        }

        let channels = Arc::new(ChannelSubscriptionManager::new(
            Arc::clone(&gateway),
            distributor.clone(),
            settings.replay_buffer,
            cancel.child_token(),
        ));
        channels.reconcile(&distributor.current().state).await;
        let reconciler = tokio::spawn(Arc::clone(&channels).run());

        let sessions = SessionContext {
            gateway: Arc::clone(&gateway),
            channels: Arc::clone(&channels),
            distributor: distributor.clone(),
            translator: Arc::new(CommandTranslator::new(deps.clock, deps.ids)),
            registry: Arc::new(SessionRegistry::new()),
            settings: settings.session,
            cancel: cancel.child_token(),
        };

        info!(
            state_version = distributor.version(),
            users = distributor.current().state.users.len(),
            channels = distributor.current().state.channels.len(),
            "chat engine started"
        );

        Ok(Arc::new(Self {
            identity: deps.identity,
            gateway,
            distributor,
            channels,
            sessions,
            cancel,
            tasks: std::sync::Mutex::new(vec![projection, reconciler]),
        }))
    }

    /// 升级连接前的会话校验
    pub async fn verify_session(&self, session_id: &str) -> Result<bool, ApplicationError> {
        Ok(self.identity.is_session_valid(session_id).await?)
    }

    /// 解析用户、写入登录事件并启动会话
    pub async fn connect(
        &self,
        session_id: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<ConnectionSession, ApplicationError> {
        if !self.is_running() {
            return Err(ApplicationError::EngineStopped);
        }

        let profile = match self.identity.user_by_session(session_id).await {
            Ok(profile) => profile,
            Err(IdentityError::UnknownSession) => return Err(ApplicationError::Unauthorized),
            Err(err) => return Err(err.into()),
        };

        ConnectionSession::open(&self.sessions, session_id, profile, transport).await
    }

    pub fn state(&self) -> StateSnapshot {
        self.distributor.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StateSnapshot> {
        self.distributor.subscribe()
    }

    pub fn gateway(&self) -> &Arc<EventLogGateway> {
        &self.gateway
    }

    pub fn channels(&self) -> &Arc<ChannelSubscriptionManager> {
        &self.channels
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.registry.len()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// 关闭所有会话（写入登出）、停止投影与调和任务并释放全部频道消息源
    pub async fn shutdown(&self) {
        if !self.is_running() {
            return;
        }

        for session in self.sessions.registry.sessions() {
            if let Err(err) = session
                .transport()
                .close(CLOSE_GOING_AWAY, "server shutting down")
                .await
            {
                warn!(user_id = %session.user_id(), error = %err, "关闭连接失败");
            }
            session.close().await;
        }

        self.cancel.cancel();
        self.channels.shutdown().await;

        let tasks = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            let _ = task.await;
        }

        info!(state_version = self.distributor.version(), "chat engine stopped");
    }
}
