#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{ChatEngine, EngineDependencies, EngineSettings, MemoryIdentityProvider};
use domain::{UserId, UserProfile};
use futures_util::{SinkExt, StreamExt};
use infrastructure::MemoryLogStore;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use web_api::{router, AppState};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub engine: Arc<ChatEngine>,
    pub store: Arc<MemoryLogStore>,
}

impl TestServer {
    pub async fn start(users: &[&str]) -> Self {
        let identity = MemoryIdentityProvider::new();
        for user in users {
            identity
                .insert_session(
                    format!("session-{user}"),
                    UserProfile {
                        user_id: UserId::new(*user),
                        display_name: user.to_string(),
                        avatar_ref: String::new(),
                    },
                )
                .await;
        }

        let store = Arc::new(MemoryLogStore::new());
        let settings = EngineSettings::default().with_liveness_probe(Duration::from_millis(100));
        let engine = ChatEngine::start(
            EngineDependencies::new(store.clone(), Arc::new(identity)),
            settings,
        )
        .await
        .expect("engine should start");

        let app = router(AppState::new(engine.clone()));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.ok();
        });

        Self { addr, engine, store }
    }

    pub fn ws_url(&self, query: &str) -> String {
        format!("ws://{}/ws?{}", self.addr, query)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect(&self, user: &str) -> Client {
        let (client, _) = connect_async(self.ws_url(&format!("sessionId=session-{user}")))
            .await
            .expect("websocket connect");
        client
    }

    pub fn is_online(&self, user: &str) -> bool {
        self.engine
            .state()
            .state
            .user(&UserId::new(user))
            .map(|user| user.online)
            .unwrap_or(false)
    }
}

pub async fn send_text(client: &mut Client, text: &str) {
    client
        .send(TungsteniteMessage::text(text))
        .await
        .expect("send text");
}

/// 读取 JSON 帧直到满足条件，超时则失败
pub async fn next_matching<F>(client: &mut Client, what: &str, mut predicate: F) -> Value
where
    F: FnMut(&Value) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let message = tokio::time::timeout(remaining, client.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for: {what}"))
            .unwrap_or_else(|| panic!("connection ended while waiting for: {what}"))
            .expect("websocket read");
        if let TungsteniteMessage::Text(text) = message {
            let value: Value = serde_json::from_str(text.as_str()).expect("json frame");
            if predicate(&value) {
                return value;
            }
        }
    }
}

pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
