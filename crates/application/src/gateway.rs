//! 事件日志网关
//!
//! 写入前基于最新状态快照做授权检查；订阅分为两阶段：
//! 先回放历史（`Replaying`），收到存储端的追赶完成信号后切换为实时（`Live`）。

use std::sync::Arc;

use domain::{ChannelId, DomainEvent, EventAuthorizer, ReplayPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::clock::{Clock, IdGenerator};
use crate::distributor::StateDistributor;
use crate::error::ApplicationError;
use crate::log_store::{AppendAck, LogStore, NewRecord, RecordSubscription, StoreSignal};

pub const DEFAULT_SERVICE_STREAM: &str = "messageService";
pub const DEFAULT_CHANNEL_STREAM_PREFIX: &str = "messageService/channel/";

/// 服务流与频道子流的命名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamKeys {
    service_stream: String,
    channel_prefix: String,
}

impl StreamKeys {
    pub fn new(service_stream: impl Into<String>, channel_prefix: impl Into<String>) -> Self {
        Self {
            service_stream: service_stream.into(),
            channel_prefix: channel_prefix.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service_stream
    }

    pub fn channel(&self, channel_id: &ChannelId) -> String {
        format!("{}{}", self.channel_prefix, channel_id)
    }

    /// 消息事件进入所属频道的子流，其余事件进入服务流
    pub fn for_event(&self, event: &DomainEvent) -> String {
        match event {
            DomainEvent::MessageReceived(message) => self.channel(&message.channel_id),
            _ => self.service_stream.clone(),
        }
    }
}

impl Default for StreamKeys {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_STREAM, DEFAULT_CHANNEL_STREAM_PREFIX)
    }
}

pub struct EventLogGateway {
    store: Arc<dyn LogStore>,
    keys: StreamKeys,
    distributor: StateDistributor,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    replay_policy: ReplayPolicy,
}

impl EventLogGateway {
    pub fn new(
        store: Arc<dyn LogStore>,
        keys: StreamKeys,
        distributor: StateDistributor,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        replay_policy: ReplayPolicy,
    ) -> Self {
        Self {
            store,
            keys,
            distributor,
            ids,
            clock,
            replay_policy,
        }
    }

    pub fn keys(&self) -> &StreamKeys {
        &self.keys
    }

    /// 授权后追加事件。检查与写入之间不加锁（乐观）。
    pub async fn append(&self, event: &DomainEvent) -> Result<AppendAck, ApplicationError> {
        let snapshot = self.distributor.current();
        if let Err(reason) = EventAuthorizer::check(&snapshot.state, event) {
            warn!(
                event_type = event.event_type(),
                state_version = snapshot.version,
                reason,
                "事件被拒绝"
            );
            return Err(ApplicationError::invalid_event(event.event_type(), reason));
        }

        let event_id = match event {
            DomainEvent::MessageReceived(message) => message.message_id.to_string(),
            _ => self.ids.next_id(),
        };
        let stream = self.keys.for_event(event);
        let record = NewRecord {
            event_id,
            event_type: event.event_type().to_owned(),
            payload: event.to_payload()?,
        };

        let ack = self.store.append(&stream, record).await?;
        debug!(
            stream = %ack.stream,
            position = ack.position,
            event_id = %ack.event_id,
            event_type = event.event_type(),
            "事件已写入日志"
        );
        Ok(ack)
    }

    pub async fn subscribe(
        &self,
        stream: &str,
        after: u64,
    ) -> Result<EventSubscription, ApplicationError> {
        let inner = self.store.subscribe_from(stream, after).await?;
        debug!(stream, after, "打开日志订阅");
        Ok(EventSubscription::new(
            stream.to_owned(),
            inner,
            after,
            self.replay_policy,
            Arc::clone(&self.clock),
        ))
    }

    pub async fn subscribe_service(&self, after: u64) -> Result<EventSubscription, ApplicationError> {
        let stream = self.keys.service().to_owned();
        self.subscribe(&stream, after).await
    }

    pub async fn subscribe_channel(
        &self,
        channel_id: &ChannelId,
        after: u64,
    ) -> Result<EventSubscription, ApplicationError> {
        let stream = self.keys.channel(channel_id);
        self.subscribe(&stream, after).await
    }

    /// 按退避重试订阅，直到成功或被取消
    pub async fn resubscribe(
        &self,
        stream: &str,
        after: u64,
        backoff: &mut Backoff,
        cancel: &CancellationToken,
    ) -> Option<EventSubscription> {
        loop {
            let delay = backoff.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.subscribe(stream, after).await {
                Ok(subscription) => {
                    info!(stream, after, "重新订阅成功");
                    return Some(subscription);
                }
                Err(err) => {
                    error!(stream, after, error = %err, waited = ?delay, "重新订阅失败");
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    Replaying,
    Live,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionItem {
    Event { position: u64, event: DomainEvent },
    CaughtUp,
}

/// 有序的领域事件订阅
///
/// 按位置去重，保证追赶到实时的切换过程中不重复；
/// 无法解析的记录跳过并记录日志；回放阶段应用 `ReplayPolicy`。
pub struct EventSubscription {
    stream: String,
    inner: RecordSubscription,
    phase: SubscriptionPhase,
    last_position: u64,
    policy: ReplayPolicy,
    clock: Arc<dyn Clock>,
    finished: bool,
}

impl EventSubscription {
    fn new(
        stream: String,
        inner: RecordSubscription,
        after: u64,
        policy: ReplayPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stream,
            inner,
            phase: SubscriptionPhase::Replaying,
            last_position: after,
            policy,
            clock,
            finished: false,
        }
    }

    pub fn phase(&self) -> SubscriptionPhase {
        self.phase
    }

    /// 最后一条已处理记录的位置，重新订阅时从这里继续
    pub fn position(&self) -> u64 {
        self.last_position
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// 下一个事件或阶段切换；存储中断时返回一次 `StoreUnavailable`，之后返回 `None`
    pub async fn next(&mut self) -> Option<Result<SubscriptionItem, ApplicationError>> {
        if self.finished {
            return None;
        }

        loop {
            let Some(signal) = self.inner.recv().await else {
                self.finished = true;
                return None;
            };

            match signal {
                StoreSignal::Record(record) => {
                    if record.position <= self.last_position {
                        debug!(
                            stream = %self.stream,
                            position = record.position,
                            "跳过重复记录"
                        );
                        continue;
                    }
                    self.last_position = record.position;

                    let event = match DomainEvent::from_payload(&record.payload) {
                        Ok(event) => event,
                        Err(err) => {
                            warn!(
                                stream = %self.stream,
                                position = record.position,
                                event_id = %record.event_id,
                                error = %err,
                                "跳过无法解析的记录"
                            );
                            continue;
                        }
                    };

                    if self.phase == SubscriptionPhase::Replaying
                        && !self.policy.is_replayable(&event, self.clock.now())
                    {
                        debug!(
                            stream = %self.stream,
                            position = record.position,
                            event_type = event.event_type(),
                            "回放时跳过过期事件"
                        );
                        continue;
                    }

                    return Some(Ok(SubscriptionItem::Event {
                        position: record.position,
                        event,
                    }));
                }
                StoreSignal::CaughtUp => {
                    if self.phase == SubscriptionPhase::Live {
                        continue;
                    }
                    self.phase = SubscriptionPhase::Live;
                    info!(
                        stream = %self.stream,
                        position = self.last_position,
                        "caught up, switching to live"
                    );
                    return Some(Ok(SubscriptionItem::CaughtUp));
                }
                StoreSignal::Dropped(reason) => {
                    self.finished = true;
                    warn!(stream = %self.stream, reason = %reason, "日志订阅被中断");
                    return Some(Err(ApplicationError::StoreUnavailable(reason)));
                }
            }
        }
    }
}
