//! 需要本地 Redis：`cargo test -p infrastructure -- --ignored`

use std::time::Duration;

use application::{LogStore, NewRecord, StoreSignal};
use infrastructure::{RedisLogStore, RedisLogStoreConfig};

fn unique_stream() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test/messageService/{nanos}")
}

fn record(n: usize) -> NewRecord {
    NewRecord {
        event_id: format!("event-{n}"),
        event_type: "TEST".into(),
        payload: format!("{{\"n\":{n}}}").into_bytes(),
    }
}

async fn connect() -> RedisLogStore {
    RedisLogStore::connect(RedisLogStoreConfig {
        read_batch: 2,
        block: Duration::from_millis(200),
        ..RedisLogStoreConfig::default()
    })
    .await
    .expect("redis should be running on 127.0.0.1:6379")
}

#[tokio::test]
#[ignore]
async fn test_append_assigns_contiguous_positions() {
    let store = connect().await;
    let stream = unique_stream();

    for n in 1..=3 {
        let ack = store.append(&stream, record(n)).await.unwrap();
        assert_eq!(ack.position, n as u64);
        assert_eq!(ack.stream, stream);
    }
}

#[tokio::test]
#[ignore]
async fn test_subscribe_replays_then_follows_live() {
    let store = connect().await;
    let stream = unique_stream();
    for n in 1..=5 {
        store.append(&stream, record(n)).await.unwrap();
    }

    let mut subscription = store.subscribe_from(&stream, 2).await.unwrap();
    let mut positions = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .unwrap()
        {
            StoreSignal::Record(record) => positions.push(record.position),
            StoreSignal::CaughtUp => break,
            StoreSignal::Dropped(reason) => panic!("dropped: {reason}"),
        }
    }
    assert_eq!(positions, vec![3, 4, 5]);

    store.append(&stream, record(6)).await.unwrap();
    let live = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    match live {
        StoreSignal::Record(record) => {
            assert_eq!(record.position, 6);
            assert_eq!(record.event_id, "event-6");
            assert_eq!(record.payload, b"{\"n\":6}".to_vec());
        }
        other => panic!("unexpected signal: {other:?}"),
    }
}
