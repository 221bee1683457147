//! 单个连接的会话
//!
//! 三个阶段各自运行在独立任务中：
//! - 组合：状态变化和频道消息合并成投递事件，写入连接的有界环形缓冲；
//! - 投递：从缓冲读取并交给传输层；
//! - 存活探测：连接不再存活时关闭会话。
//! 关闭是幂等的，只会触发一次登出和一次资源释放。

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use domain::{
    Channel, ChannelId, Command, DomainEvent, FeedEvent, MessageId, MessageReceived,
    ProjectedState, User, UserId, UserLoggedIn, UserLoggedOut, UserProfile,
};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::channels::{ChannelSubscriptionManager, MessageStream};
use crate::distributor::StateDistributor;
use crate::error::{ApplicationError, DeliveryError};
use crate::gateway::EventLogGateway;
use crate::translator::CommandTranslator;
use crate::transport::Transport;

/// 关闭时等待本会话登录被投影的上限
const LOGIN_PROJECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// 存储不可用时登出事件的最多写入次数
const LOGOUT_APPEND_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub liveness_probe: Duration,
    /// 按消息 ID 去重时记住的最近消息数
    pub dedup_window: usize,
    /// 每个连接的待投递事件上限，溢出时丢弃最旧的
    pub outbound_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            liveness_probe: Duration::from_secs(10),
            dedup_window: 1024,
            outbound_buffer: 500,
        }
    }
}

/// 会话依赖的共享组件
#[derive(Clone)]
pub struct SessionContext {
    pub gateway: Arc<EventLogGateway>,
    pub channels: Arc<ChannelSubscriptionManager>,
    pub distributor: StateDistributor,
    pub translator: Arc<CommandTranslator>,
    pub registry: Arc<SessionRegistry>,
    pub settings: SessionSettings,
    pub cancel: CancellationToken,
}

/// 当前打开的会话
#[derive(Default)]
pub struct SessionRegistry {
    sessions: std::sync::Mutex<HashMap<u64, ConnectionSession>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn insert(&self, session: ConnectionSession) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.connection_id(), session);
    }

    fn remove(&self, connection_id: u64) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&connection_id);
    }

    pub fn sessions(&self) -> Vec<ConnectionSession> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connection_id: u64,
    session_id: String,
    profile: UserProfile,
    transport: Arc<dyn Transport>,
    context: SessionContext,
    registered: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    /// 已 attach 的频道，关闭时逐个 detach
    held: Mutex<BTreeSet<ChannelId>>,
}

impl ConnectionSession {
    /// 写入登录事件并启动会话的三个阶段。登录写入失败时拒绝连接。
    pub async fn open(
        context: &SessionContext,
        session_id: impl Into<String>,
        profile: UserProfile,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ApplicationError> {
        let login = DomainEvent::UserLoggedIn(UserLoggedIn::from(profile.clone()));
        context.gateway.append(&login).await?;

        let session = Self {
            inner: Arc::new(SessionInner {
                connection_id: context.registry.next_connection_id(),
                session_id: session_id.into(),
                profile,
                transport,
                context: context.clone(),
                registered: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                cancel: context.cancel.child_token(),
                held: Mutex::new(BTreeSet::new()),
            }),
        };
        context.registry.insert(session.clone());

        let (outbound, receiver) = broadcast::channel(context.settings.outbound_buffer.max(1));
        tokio::spawn(session.clone().compose(outbound));
        tokio::spawn(session.clone().deliver(receiver));
        tokio::spawn(session.clone().probe_liveness());

        info!(
            user_id = %session.user_id(),
            connection_id = session.connection_id(),
            "session registered"
        );
        Ok(session)
    }

    pub fn connection_id(&self) -> u64 {
        self.inner.connection_id
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.inner.profile.user_id
    }

    pub fn profile(&self) -> &UserProfile {
        &self.inner.profile
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 处理客户端发来的一条命令
    pub async fn handle_message(&self, text: &str) -> Result<(), ApplicationError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed.into());
        }

        let command = Command::parse(text)?;
        let Some(event) = self
            .inner
            .context
            .translator
            .translate(self.user_id(), command)
        else {
            warn!(user_id = %self.user_id(), "忽略未知命令");
            return Ok(());
        };

        self.inner.context.gateway.append(&event).await?;
        Ok(())
    }

    /// 释放频道订阅并写入登出事件；重复调用无效果
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();

        let held = {
            let mut held = self.inner.held.lock().await;
            std::mem::take(&mut *held)
        };
        for channel_id in &held {
            self.inner.context.channels.detach(channel_id).await;
        }

        if self.inner.registered.swap(false, Ordering::AcqRel) {
            // 登出的授权依赖已投影的登录
            let user_id = self.user_id().clone();
            let projected = self
                .inner
                .context
                .distributor
                .wait_for(LOGIN_PROJECTION_TIMEOUT, |state| state.users.contains_key(&user_id))
                .await;
            if projected.is_none() {
                warn!(user_id = %user_id, "登录事件尚未投影，登出可能被拒绝");
            }

            self.append_logout().await;
        }

        self.inner.context.registry.remove(self.connection_id());
        info!(
            user_id = %self.user_id(),
            connection_id = self.connection_id(),
            channels = held.len(),
            "session closed"
        );
    }

    /// 存储暂时不可用时按退避重试，否则连接计数会一直偏高
    async fn append_logout(&self) {
        let logout = DomainEvent::UserLoggedOut(UserLoggedOut {
            user_id: self.user_id().clone(),
        });
        let mut backoff = Backoff::default();

        for attempt in 1..=LOGOUT_APPEND_ATTEMPTS {
            let err = match self.inner.context.gateway.append(&logout).await {
                Ok(_) => return,
                Err(err) => err,
            };
            if !matches!(err, ApplicationError::StoreUnavailable(_))
                || attempt == LOGOUT_APPEND_ATTEMPTS
            {
                error!(user_id = %self.user_id(), error = %err, attempt, "写入登出事件失败");
                return;
            }

            let delay = backoff.next_delay();
            warn!(
                user_id = %self.user_id(),
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "存储不可用，稍后重试登出"
            );
            tokio::select! {
                _ = self.inner.context.cancel.cancelled() => {
                    warn!(user_id = %self.user_id(), "引擎已停止，放弃写入登出事件");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn compose(self, outbound: broadcast::Sender<FeedEvent>) {
        let mut state_rx = self.inner.context.distributor.subscribe();
        let mut feeds: StreamMap<ChannelId, MessageStream> = StreamMap::new();
        let mut composer = FeedComposer::new(
            self.user_id().clone(),
            self.inner.context.settings.dedup_window,
        );

        let snapshot = state_rx.borrow_and_update().clone();
        self.apply_state(&snapshot.state, &mut feeds, &mut composer, &outbound)
            .await;

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = state_rx.borrow_and_update().clone();
                    self.apply_state(&snapshot.state, &mut feeds, &mut composer, &outbound)
                        .await;
                }
                Some((_, message)) = feeds.next(), if !feeds.is_empty() => {
                    if let Some(event) = composer.on_message(message) {
                        let _ = outbound.send(event);
                    }
                }
            }
        }
        debug!(connection_id = self.connection_id(), "compose stage stopped");
    }

    async fn apply_state(
        &self,
        state: &ProjectedState,
        feeds: &mut StreamMap<ChannelId, MessageStream>,
        composer: &mut FeedComposer,
        outbound: &broadcast::Sender<FeedEvent>,
    ) {
        {
            let mut held = self.inner.held.lock().await;
            if self.is_closed() {
                return;
            }
            for channel in state.visible_channels(self.user_id()) {
                if held.contains(&channel.channel_id) {
                    continue;
                }
                match self.inner.context.channels.attach(&channel.channel_id).await {
                    Ok(view) => {
                        feeds.insert(channel.channel_id.clone(), view.into_stream());
                        held.insert(channel.channel_id);
                    }
                    Err(err) => {
                        warn!(
                            user_id = %self.user_id(),
                            channel_id = %channel.channel_id,
                            error = %err,
                            "attach channel failed, retry on next state change"
                        );
                    }
                }
            }
        }

        for event in composer.on_state(state) {
            let _ = outbound.send(event);
        }
    }

    async fn deliver(self, mut receiver: broadcast::Receiver<FeedEvent>) {
        loop {
            let received = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                received = receiver.recv() => received,
            };

            match received {
                Ok(event) => {
                    let frame = match event.to_json() {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(error = %err, "序列化投递事件失败");
                            continue;
                        }
                    };
                    if let Err(err) = self.inner.transport.deliver(frame).await {
                        warn!(
                            user_id = %self.user_id(),
                            connection_id = self.connection_id(),
                            error = %err,
                            "投递失败，关闭会话"
                        );
                        self.close().await;
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        user_id = %self.user_id(),
                        connection_id = self.connection_id(),
                        skipped,
                        "outbound buffer overflow, oldest events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!(connection_id = self.connection_id(), "deliver stage stopped");
    }

    async fn probe_liveness(self) {
        let period = self.inner.context.settings.liveness_probe;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if !self.inner.transport.is_alive() {
                        info!(
                            user_id = %self.user_id(),
                            connection_id = self.connection_id(),
                            "connection no longer alive"
                        );
                        self.close().await;
                        break;
                    }
                }
            }
        }
    }
}

/// 把状态快照和频道消息转换为投递事件（不含 I/O）
struct FeedComposer {
    user_id: UserId,
    seen: DedupWindow,
    last_users: Option<Vec<User>>,
    last_channels: Option<Vec<Channel>>,
}

impl FeedComposer {
    fn new(user_id: UserId, dedup_window: usize) -> Self {
        Self {
            user_id,
            seen: DedupWindow::new(dedup_window),
            last_users: None,
            last_channels: None,
        }
    }

    /// 用户列表或可见频道与上次投递的值不同时才产生事件
    fn on_state(&mut self, state: &ProjectedState) -> Vec<FeedEvent> {
        let mut events = Vec::new();

        let users = state.user_list();
        if self.last_users.as_ref() != Some(&users) {
            self.last_users = Some(users.clone());
            events.push(FeedEvent::OnlineUsersChanged { users });
        }

        let channels = state.visible_channels(&self.user_id);
        if self.last_channels.as_ref() != Some(&channels) {
            self.last_channels = Some(channels.clone());
            events.push(FeedEvent::AvailableChannelsChanged { channels });
        }

        events
    }

    fn on_message(&mut self, message: MessageReceived) -> Option<FeedEvent> {
        if message.content.trim().is_empty() {
            return None;
        }
        if !self.seen.insert(message.message_id.clone()) {
            return None;
        }
        Some(FeedEvent::MessageReceived(message))
    }
}

/// 记住最近 N 个消息 ID
struct DedupWindow {
    order: VecDeque<MessageId>,
    seen: HashSet<MessageId>,
    capacity: usize,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// 首次出现返回 true
    fn insert(&mut self, id: MessageId) -> bool {
        if self.seen.contains(&id) {
            return false;
        }
        self.seen.insert(id.clone());
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}
