//! 基于 Redis Streams 的事件日志
//!
//! 每个日志流对应一个 Redis stream。写入通过 Lua 脚本原子地分配
//! 从 1 开始的连续位置，并以 `<position>-0` 作为条目 ID。
//! 订阅先用 `XRANGE` 分批读取历史，发出 `CaughtUp` 后用 `XREAD BLOCK` 实时跟随。

use std::time::Duration;

use application::{AppendAck, LogStore, LogStoreError, NewRecord, RecordSubscription, StoreSignal, StoredRecord};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const APPEND_SCRIPT: &str = r#"
local last = redis.call('XREVRANGE', KEYS[1], '+', '-', 'COUNT', 1)
local position = 1
if #last > 0 then
    position = tonumber(string.match(last[1][1], '^(%d+)')) + 1
end
redis.call('XADD', KEYS[1], position .. '-0',
    'eventId', ARGV[1], 'eventType', ARGV[2], 'payload', ARGV[3])
return position
"#;

#[derive(Debug, Clone)]
pub struct RedisLogStoreConfig {
    pub url: String,
    /// 每次 `XRANGE` / `XREAD` 读取的条目数
    pub read_batch: usize,
    /// `XREAD BLOCK` 的阻塞时长
    pub block: Duration,
}

impl Default for RedisLogStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            read_batch: 256,
            block: Duration::from_millis(5000),
        }
    }
}

pub struct RedisLogStore {
    client: redis::Client,
    connection: ConnectionManager,
    script: redis::Script,
    config: RedisLogStoreConfig,
}

impl RedisLogStore {
    /// 建立连接；Redis 不可达时返回 `Unavailable`
    pub async fn connect(config: RedisLogStoreConfig) -> Result<Self, LogStoreError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| LogStoreError::backend(format!("invalid redis url: {e}")))?;
        let connection = ConnectionManager::new(client.clone())
            .await
            .map_err(map_redis_error)?;

        info!(read_batch = config.read_batch, "Redis 事件日志已连接");
        Ok(Self {
            client,
            connection,
            script: redis::Script::new(APPEND_SCRIPT),
            config,
        })
    }

    /// 订阅使用独立连接，避免阻塞读取影响写入
    async fn dedicated_connection(&self) -> Result<MultiplexedConnection, LogStoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)
    }
}

#[async_trait]
impl LogStore for RedisLogStore {
    async fn append(&self, stream: &str, record: NewRecord) -> Result<AppendAck, LogStoreError> {
        let mut conn = self.connection.clone();
        let position: u64 = self
            .script
            .key(stream)
            .arg(&record.event_id)
            .arg(&record.event_type)
            .arg(record.payload.as_slice())
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(AppendAck {
            stream: stream.to_owned(),
            position,
            event_id: record.event_id,
        })
    }

    async fn subscribe_from(
        &self,
        stream: &str,
        after: u64,
    ) -> Result<RecordSubscription, LogStoreError> {
        let conn = self.dedicated_connection().await?;
        let (sender, receiver) = mpsc::channel(self.config.read_batch.max(1) * 2);
        let cancel = CancellationToken::new();

        tokio::spawn(tail_stream(
            conn,
            stream.to_owned(),
            after,
            self.config.clone(),
            sender,
            cancel.clone(),
        ));

        Ok(RecordSubscription::new(receiver, cancel))
    }
}

async fn tail_stream(
    mut conn: MultiplexedConnection,
    stream: String,
    after: u64,
    config: RedisLogStoreConfig,
    sender: mpsc::Sender<StoreSignal>,
    cancel: CancellationToken,
) {
    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = read_stream(&mut conn, &stream, after, &config, &sender) => result,
    };

    if let Err(err) = result {
        warn!(stream = %stream, error = %err, "Redis 日志订阅中断");
        let _ = sender.send(StoreSignal::Dropped(err.to_string())).await;
    }
    debug!(stream = %stream, "Redis subscription ended");
}

/// 接收端关闭时返回 `Ok(())`
async fn read_stream(
    conn: &mut MultiplexedConnection,
    stream: &str,
    after: u64,
    config: &RedisLogStoreConfig,
    sender: &mpsc::Sender<StoreSignal>,
) -> Result<(), LogStoreError> {
    let batch = config.read_batch.max(1);
    let mut last = after;

    loop {
        let reply: StreamRangeReply = conn
            .xrange_count(stream, format!("{}-0", last + 1), "+", batch)
            .await
            .map_err(map_redis_error)?;
        let count = reply.ids.len();

        for entry in &reply.ids {
            let Some(record) = to_record(stream, entry) else {
                continue;
            };
            last = record.position;
            if sender.send(StoreSignal::Record(record)).await.is_err() {
                return Ok(());
            }
        }

        if count < batch {
            break;
        }
    }

    if sender.send(StoreSignal::CaughtUp).await.is_err() {
        return Ok(());
    }

    let block_ms = usize::try_from(config.block.as_millis()).unwrap_or(usize::MAX);
    let options = StreamReadOptions::default().block(block_ms).count(batch);
    loop {
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &[format!("{last}-0")], &options)
            .await
            .map_err(map_redis_error)?;
        let Some(reply) = reply else {
            if sender.is_closed() {
                return Ok(());
            }
            continue;
        };

        for key in reply.keys {
            for entry in &key.ids {
                let Some(record) = to_record(stream, entry) else {
                    continue;
                };
                last = record.position;
                if sender.send(StoreSignal::Record(record)).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// 条目 ID 无法解析时跳过；缺失字段按空值处理，由上层判定为无法解析的负载
fn to_record(stream: &str, entry: &StreamId) -> Option<StoredRecord> {
    let Some(position) = parse_position(&entry.id) else {
        warn!(stream, entry_id = %entry.id, "跳过无法识别的条目 ID");
        return None;
    };

    Some(StoredRecord {
        stream: stream.to_owned(),
        position,
        event_id: entry.get("eventId").unwrap_or_default(),
        event_type: entry.get("eventType").unwrap_or_default(),
        payload: entry.get("payload").unwrap_or_default(),
    })
}

fn parse_position(entry_id: &str) -> Option<u64> {
    entry_id.split('-').next()?.parse().ok()
}

fn map_redis_error(err: redis::RedisError) -> LogStoreError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        LogStoreError::unavailable(err.to_string())
    } else {
        LogStoreError::backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("42-0"), Some(42));
        assert_eq!(parse_position("1-0"), Some(1));
        assert_eq!(parse_position("garbage"), None);
    }
}
