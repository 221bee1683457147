//! 频道订阅管理
//!
//! 以频道 ID 为键的实时消息源集合。每个消息源持有一个频道子流订阅、
//! 一个有界回放缓冲和显式的观看者计数。
//! 频道被激活时打开；既未激活又没有观看者时关闭（公共频道始终激活）。

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use domain::{ChannelId, DomainEvent, MessageReceived, ProjectedState};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::distributor::StateDistributor;
use crate::error::ApplicationError;
use crate::gateway::{EventLogGateway, EventSubscription, SubscriptionItem};
use crate::replay::ReplayFeed;

pub type MessageStream = Pin<Box<dyn Stream<Item = MessageReceived> + Send>>;

/// 单个连接对某个频道的视图：先是缓冲内容，再是实时消息
pub struct ChannelView {
    pub channel_id: ChannelId,
    pub backlog: Vec<MessageReceived>,
    pub receiver: broadcast::Receiver<MessageReceived>,
}

impl ChannelView {
    pub fn into_stream(self) -> MessageStream {
        let channel_id = self.channel_id;
        let live = BroadcastStream::new(self.receiver).filter_map(move |item| match item {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(channel_id = %channel_id, error = %err, "频道消息积压，丢弃最旧的消息");
                None
            }
        });
        Box::pin(tokio_stream::iter(self.backlog).chain(live))
    }
}

struct ChannelFeed {
    viewers: usize,
    feed: Arc<ReplayFeed<MessageReceived>>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

pub struct ChannelSubscriptionManager {
    gateway: Arc<EventLogGateway>,
    distributor: StateDistributor,
    feeds: Mutex<HashMap<ChannelId, ChannelFeed>>,
    replay_capacity: usize,
    cancel: CancellationToken,
}

impl ChannelSubscriptionManager {
    pub fn new(
        gateway: Arc<EventLogGateway>,
        distributor: StateDistributor,
        replay_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            distributor,
            feeds: Mutex::new(HashMap::new()),
            replay_capacity,
            cancel,
        }
    }

    /// 增加观看者并返回频道视图；消息源未打开时按需打开
    pub async fn attach(&self, channel_id: &ChannelId) -> Result<ChannelView, ApplicationError> {
        // 打开订阅可能要连接存储，不能持锁等待
        let opened = if self.is_open(channel_id).await {
            None
        } else {
            Some(self.open_feed(channel_id).await?)
        };

        let mut feeds = self.feeds.lock().await;
        if let Some(feed) = opened {
            self.insert_feed(&mut feeds, channel_id, feed);
        }
        if !feeds.contains_key(channel_id) {
            // 检查之后、加锁之前被关闭：重新打开一次
            drop(feeds);
            let feed = self.open_feed(channel_id).await?;
            feeds = self.feeds.lock().await;
            self.insert_feed(&mut feeds, channel_id, feed);
        }

        let Some(entry) = feeds.get_mut(channel_id) else {
            return Err(ApplicationError::EngineStopped);
        };
        entry.viewers += 1;
        let (backlog, receiver) = entry.feed.subscribe();
        debug!(channel_id = %channel_id, viewers = entry.viewers, "attach channel feed");

        Ok(ChannelView {
            channel_id: channel_id.clone(),
            backlog,
            receiver,
        })
    }

    /// 减少观看者；频道未激活且无人观看时立即关闭
    pub async fn detach(&self, channel_id: &ChannelId) {
        let activated = self.distributor.current().state.is_activated(channel_id);
        let mut feeds = self.feeds.lock().await;
        let Some(entry) = feeds.get_mut(channel_id) else {
            return;
        };
        entry.viewers = entry.viewers.saturating_sub(1);
        debug!(channel_id = %channel_id, viewers = entry.viewers, "detach channel feed");

        if entry.viewers == 0 && !activated {
            if let Some(feed) = feeds.remove(channel_id) {
                Self::close_feed(channel_id, feed);
            }
        }
    }

    /// 按激活集合打开或关闭消息源
    pub async fn reconcile(&self, state: &ProjectedState) {
        let missing: Vec<ChannelId> = {
            let feeds = self.feeds.lock().await;
            state
                .activations
                .iter()
                .filter(|channel_id| !feeds.contains_key(*channel_id))
                .cloned()
                .collect()
        };

        let mut opened = Vec::with_capacity(missing.len());
        for channel_id in missing {
            match self.open_feed(&channel_id).await {
                Ok(feed) => opened.push((channel_id, feed)),
                Err(err) => {
                    error!(channel_id = %channel_id, error = %err, "打开频道消息源失败");
                }
            }
        }

        let mut feeds = self.feeds.lock().await;
        for (channel_id, feed) in opened {
            self.insert_feed(&mut feeds, &channel_id, feed);
        }

        let idle: Vec<ChannelId> = feeds
            .iter()
            .filter(|(channel_id, feed)| feed.viewers == 0 && !state.is_activated(channel_id))
            .map(|(channel_id, _)| channel_id.clone())
            .collect();
        for channel_id in idle {
            if let Some(feed) = feeds.remove(&channel_id) {
                Self::close_feed(&channel_id, feed);
            }
        }
    }

    /// 跟随状态变化持续调和，直到取消
    pub async fn run(self: Arc<Self>) {
        let mut receiver = self.distributor.subscribe();
        let snapshot = receiver.borrow_and_update().clone();
        self.reconcile(&snapshot.state).await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = receiver.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = receiver.borrow_and_update().clone();
                    self.reconcile(&snapshot.state).await;
                }
            }
        }
        debug!("channel reconciler stopped");
    }

    pub async fn shutdown(&self) {
        let mut feeds = self.feeds.lock().await;
        for (channel_id, feed) in feeds.drain() {
            Self::close_feed(&channel_id, feed);
        }
    }

    pub async fn is_open(&self, channel_id: &ChannelId) -> bool {
        self.feeds.lock().await.contains_key(channel_id)
    }

    pub async fn viewer_count(&self, channel_id: &ChannelId) -> usize {
        self.feeds
            .lock()
            .await
            .get(channel_id)
            .map(|feed| feed.viewers)
            .unwrap_or(0)
    }

    pub async fn open_channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self.feeds.lock().await.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// 并发打开了同一频道时保留先插入的那个
    fn insert_feed(
        &self,
        feeds: &mut HashMap<ChannelId, ChannelFeed>,
        channel_id: &ChannelId,
        feed: ChannelFeed,
    ) {
        if feeds.contains_key(channel_id) {
            Self::close_feed(channel_id, feed);
        } else {
            feeds.insert(channel_id.clone(), feed);
        }
    }

    async fn open_feed(&self, channel_id: &ChannelId) -> Result<ChannelFeed, ApplicationError> {
        let subscription = self.gateway.subscribe_channel(channel_id, 0).await?;
        let feed = Arc::new(ReplayFeed::new(self.replay_capacity));
        let cancel = self.cancel.child_token();

        let pump = tokio::spawn(pump_channel(
            Arc::clone(&self.gateway),
            channel_id.clone(),
            subscription,
            Arc::clone(&feed),
            cancel.clone(),
        ));

        info!(channel_id = %channel_id, "channel feed opened");
        Ok(ChannelFeed {
            viewers: 0,
            feed,
            cancel,
            pump,
        })
    }

    fn close_feed(channel_id: &ChannelId, feed: ChannelFeed) {
        feed.cancel.cancel();
        feed.pump.abort();
        info!(channel_id = %channel_id, buffered = feed.feed.len(), "channel feed closed");
    }
}

/// 把频道子流中的消息写入回放缓冲
async fn pump_channel(
    gateway: Arc<EventLogGateway>,
    channel_id: ChannelId,
    mut subscription: EventSubscription,
    feed: Arc<ReplayFeed<MessageReceived>>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::default();

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = subscription.next() => item,
        };

        match item {
            Some(Ok(SubscriptionItem::Event {
                event: DomainEvent::MessageReceived(message),
                ..
            })) => {
                if message.channel_id != channel_id {
                    debug!(channel_id = %channel_id, other = %message.channel_id, "忽略其他频道的消息");
                    continue;
                }
                feed.publish(message);
                backoff.reset();
            }
            Some(Ok(SubscriptionItem::Event { event, position })) => {
                debug!(
                    channel_id = %channel_id,
                    position,
                    event_type = event.event_type(),
                    "频道子流中的非消息事件"
                );
            }
            Some(Ok(SubscriptionItem::CaughtUp)) => {
                debug!(channel_id = %channel_id, buffered = feed.len(), "频道回放完成");
            }
            Some(Err(_)) | None => {
                let stream = subscription.stream().to_owned();
                let after = subscription.position();
                match gateway.resubscribe(&stream, after, &mut backoff, &cancel).await {
                    Some(next) => subscription = next,
                    None => break,
                }
            }
        }
    }
}
