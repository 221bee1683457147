#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use application::{
    ChatEngine, DeliveryError, EngineDependencies, EngineSettings, LogStore, MemoryIdentityProvider,
    NewRecord, Transport,
};
use async_trait::async_trait;
use domain::{DomainEvent, UserId, UserProfile};
use infrastructure::MemoryLogStore;
use serde_json::Value;

pub const SERVICE_STREAM: &str = "messageService";
pub const PUBLIC_STREAM: &str = "messageService/channel/public";

/// 记录收到的帧，可以模拟断线和发送失败
#[derive(Default)]
pub struct TestTransport {
    frames: Mutex<Vec<Value>>,
    dead: AtomicBool,
    fail_delivery: AtomicBool,
    close_codes: Mutex<Vec<u16>>,
}

impl TestTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.fail_delivery.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn set_alive(&self, alive: bool) {
        self.dead.store(!alive, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frames_of(&self, kind: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|frame| frame["type"] == kind)
            .collect()
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.frames_of("MESSAGE_RECEIVED")
            .iter()
            .filter_map(|frame| frame["messageId"].as_str().map(str::to_owned))
            .collect()
    }

    pub fn close_codes(&self) -> Vec<u16> {
        self.close_codes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for TestTransport {
    async fn deliver(&self, frame: String) -> Result<(), DeliveryError> {
        if self.fail_delivery.load(Ordering::SeqCst) {
            return Err(DeliveryError::Transport("broken pipe".into()));
        }
        let value: Value = serde_json::from_str(&frame)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        self.frames.lock().unwrap().push(value);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    async fn close(&self, code: u16, _reason: &str) -> Result<(), DeliveryError> {
        self.close_codes.lock().unwrap().push(code);
        self.dead.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn session_of(user: &str) -> String {
    format!("session-{user}")
}

pub async fn identity_with(users: &[&str]) -> Arc<MemoryIdentityProvider> {
    let identity = MemoryIdentityProvider::new();
    for user in users {
        identity
            .insert_session(
                session_of(user),
                UserProfile {
                    user_id: UserId::new(*user),
                    display_name: user.to_uppercase(),
                    avatar_ref: format!("{user}.png"),
                },
            )
            .await;
    }
    Arc::new(identity)
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings::default().with_liveness_probe(Duration::from_millis(50))
}

pub async fn start_engine(
    store: Arc<MemoryLogStore>,
    identity: Arc<MemoryIdentityProvider>,
) -> Arc<ChatEngine> {
    ChatEngine::start(EngineDependencies::new(store, identity), fast_settings())
        .await
        .expect("engine should start")
}

/// 直接向存储写入事件（绕过授权），用于构造历史
pub async fn seed(store: &MemoryLogStore, stream: &str, event: &DomainEvent) {
    store
        .append(
            stream,
            NewRecord {
                event_id: uuid_like(stream, store.records(stream).len()),
                event_type: event.event_type().to_owned(),
                payload: event.to_payload().unwrap(),
            },
        )
        .await
        .unwrap();
}

fn uuid_like(stream: &str, index: usize) -> String {
    format!("{stream}-{index}")
}

pub fn count_events(store: &MemoryLogStore, stream: &str, kind: &str) -> usize {
    store
        .records(stream)
        .iter()
        .filter(|record| record.event_type == kind)
        .count()
}

/// 轮询直到条件成立，超时则失败
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
