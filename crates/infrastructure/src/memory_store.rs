//! 进程内事件日志，用于测试和单机运行
//!
//! 追加和订阅在同一把锁内读取历史并注册实时接收端，
//! 因此追赶到实时的切换不会漏掉记录。

use std::collections::HashMap;
use std::sync::Mutex;

use application::{AppendAck, LogStore, LogStoreError, NewRecord, RecordSubscription, StoreSignal, StoredRecord};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const LIVE_CAPACITY: usize = 1024;
const SUBSCRIPTION_BUFFER: usize = 256;

struct MemoryStream {
    records: Vec<StoredRecord>,
    live: broadcast::Sender<StoredRecord>,
}

impl MemoryStream {
    fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            records: Vec::new(),
            live,
        }
    }
}

pub struct MemoryLogStore {
    streams: Mutex<HashMap<String, MemoryStream>>,
    available: watch::Sender<bool>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        let (available, _) = watch::channel(true);
        Self {
            streams: Mutex::new(HashMap::new()),
            available,
        }
    }

    /// 模拟存储断开与恢复。断开时现有订阅收到 `Dropped`，新的调用立即失败。
    pub fn set_available(&self, available: bool) {
        self.available.send_replace(available);
    }

    pub fn is_available(&self) -> bool {
        *self.available.borrow()
    }

    /// 某个流当前的全部记录
    pub fn records(&self, stream: &str) -> Vec<StoredRecord> {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(stream)
            .map(|s| s.records.clone())
            .unwrap_or_default()
    }

    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn ensure_available(&self) -> Result<(), LogStoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(LogStoreError::unavailable("memory store is offline"))
        }
    }
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, stream: &str, record: NewRecord) -> Result<AppendAck, LogStoreError> {
        self.ensure_available()?;

        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        let entry = streams
            .entry(stream.to_owned())
            .or_insert_with(MemoryStream::new);
        let stored = StoredRecord {
            stream: stream.to_owned(),
            position: entry.records.len() as u64 + 1,
            event_id: record.event_id,
            event_type: record.event_type,
            payload: record.payload,
        };
        entry.records.push(stored.clone());
        let _ = entry.live.send(stored.clone());

        Ok(AppendAck {
            stream: stored.stream,
            position: stored.position,
            event_id: stored.event_id,
        })
    }

    async fn subscribe_from(
        &self,
        stream: &str,
        after: u64,
    ) -> Result<RecordSubscription, LogStoreError> {
        self.ensure_available()?;

        let (backlog, live) = {
            let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            let entry = streams
                .entry(stream.to_owned())
                .or_insert_with(MemoryStream::new);
            let start = usize::try_from(after)
                .unwrap_or(usize::MAX)
                .min(entry.records.len());
            (entry.records[start..].to_vec(), entry.live.subscribe())
        };

        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        tokio::spawn(forward(
            stream.to_owned(),
            backlog,
            live,
            self.available.subscribe(),
            sender,
            cancel.clone(),
        ));

        Ok(RecordSubscription::new(receiver, cancel))
    }
}

async fn forward(
    stream: String,
    backlog: Vec<StoredRecord>,
    mut live: broadcast::Receiver<StoredRecord>,
    mut available: watch::Receiver<bool>,
    sender: mpsc::Sender<StoreSignal>,
    cancel: CancellationToken,
) {
    for record in backlog {
        if sender.send(StoreSignal::Record(record)).await.is_err() {
            return;
        }
    }
    if sender.send(StoreSignal::CaughtUp).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            went_offline = async { available.wait_for(|available| !*available).await.is_ok() } => {
                if went_offline {
                    let _ = sender.send(StoreSignal::Dropped("memory store went offline".into())).await;
                }
                break;
            }
            received = live.recv() => match received {
                Ok(record) => {
                    if sender.send(StoreSignal::Record(record)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(stream = %stream, skipped, "subscriber lagged behind live tail");
                    let _ = sender
                        .send(StoreSignal::Dropped(format!("subscriber lagged by {skipped} records")))
                        .await;
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!(stream = %stream, "memory subscription ended");
}
