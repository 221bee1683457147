//! 追加式事件日志存储的抽象
//!
//! 每个流是一条独立的有序日志，位置从 1 开始连续递增。
//! 订阅先推送已有记录，然后发出 `CaughtUp`，之后实时推送新追加的记录。

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::LogStoreError;

/// 待写入的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub event_id: String,
    pub event_type: String,
    pub payload: Vec<u8>,
}

/// 已持久化的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub stream: String,
    pub position: u64,
    pub event_id: String,
    pub event_type: String,
    pub payload: Vec<u8>,
}

/// 写入确认：记录已持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendAck {
    pub stream: String,
    pub position: u64,
    pub event_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSignal {
    Record(StoredRecord),
    /// 历史记录已全部推送，后续均为实时记录
    CaughtUp,
    /// 订阅被存储端中断
    Dropped(String),
}

/// 存储端订阅句柄。丢弃时自动取消后台读取。
#[derive(Debug)]
pub struct RecordSubscription {
    receiver: mpsc::Receiver<StoreSignal>,
    cancel: CancellationToken,
}

impl RecordSubscription {
    pub fn new(receiver: mpsc::Receiver<StoreSignal>, cancel: CancellationToken) -> Self {
        Self { receiver, cancel }
    }

    /// 存储端关闭通道后返回 `None`
    pub async fn recv(&mut self) -> Option<StoreSignal> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.receiver.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for RecordSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// 追加一条记录（不做版本检查），返回前记录已持久化
    async fn append(&self, stream: &str, record: NewRecord) -> Result<AppendAck, LogStoreError>;

    /// 订阅位置大于 `after` 的记录；`after = 0` 表示从头开始
    async fn subscribe_from(
        &self,
        stream: &str,
        after: u64,
    ) -> Result<RecordSubscription, LogStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropping_subscription_cancels_token() {
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let subscription = RecordSubscription::new(rx, cancel.clone());
        assert!(!cancel.is_cancelled());
        drop(subscription);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_yielding() {
        let (tx, rx) = mpsc::channel(4);
        let mut subscription = RecordSubscription::new(rx, CancellationToken::new());
        tx.send(StoreSignal::CaughtUp).await.unwrap();
        assert_eq!(subscription.recv().await, Some(StoreSignal::CaughtUp));

        tx.send(StoreSignal::CaughtUp).await.unwrap();
        subscription.cancel();
        assert_eq!(subscription.recv().await, None);
    }
}
