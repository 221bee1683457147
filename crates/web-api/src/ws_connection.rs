use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use application::{ChatEngine, DeliveryError, Transport};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// 连接建立失败时使用的关闭码
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// WebSocket 写操作命令
///
/// 使用命令模式统一管理所有对 WebSocket sender 的写操作
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
    Close(u16, String),
}

/// 基于 WebSocket 的发送端，所有写操作经由 mpsc 交给唯一的发送任务
#[derive(Clone)]
pub struct WsTransport {
    commands: mpsc::Sender<WsCommand>,
    alive: Arc<AtomicBool>,
}

impl WsTransport {
    fn new(commands: mpsc::Sender<WsCommand>) -> Self {
        Self {
            commands,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn deliver(&self, frame: String) -> Result<(), DeliveryError> {
        self.commands
            .send(WsCommand::SendText(frame))
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.commands.is_closed()
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), DeliveryError> {
        self.mark_dead();
        self.commands
            .send(WsCommand::Close(code, reason.to_string()))
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}

/// 运行单个 WebSocket 连接直到任意一端关闭
pub async fn serve(socket: WebSocket, engine: Arc<ChatEngine>, session_id: String) {
    let (mut sender, mut incoming) = socket.split();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);
    let transport = WsTransport::new(cmd_tx);

    // 发送任务：唯一持有 sender
    let send_task = {
        let transport = transport.clone();
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let result = match cmd {
                    WsCommand::SendText(text) => sender.send(WsMessage::Text(text.into())).await,
                    WsCommand::SendPong(data) => sender.send(WsMessage::Pong(data.into())).await,
                    WsCommand::Close(code, reason) => {
                        let frame = CloseFrame {
                            code,
                            reason: reason.into(),
                        };
                        let _ = sender.send(WsMessage::Close(Some(frame))).await;
                        break;
                    }
                };
                if let Err(err) = result {
                    tracing::warn!(error = %err, "WebSocket 发送失败");
                    break;
                }
            }
            transport.mark_dead();
            tracing::debug!("WebSocket发送任务结束");
        })
    };

    let session = match engine
        .connect(&session_id, Arc::new(transport.clone()))
        .await
    {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %err, "建立聊天会话失败");
            let _ = transport
                .close(CLOSE_INTERNAL_ERROR, "internal server error")
                .await;
            let _ = send_task.await;
            return;
        }
    };

    tracing::info!(
        user_id = %session.user_id(),
        connection_id = session.connection_id(),
        "WebSocket 连接已建立"
    );

    while let Some(message) = incoming.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                if text.as_str() == "ping" {
                    let pong = serde_json::json!({ "ping": "pong" }).to_string();
                    if transport.deliver(pong).await.is_err() {
                        break;
                    }
                    continue;
                }
                if let Err(err) = session.handle_message(text.as_str()).await {
                    if matches!(err, application::ApplicationError::Delivery(DeliveryError::Closed)) {
                        break;
                    }
                    tracing::warn!(user_id = %session.user_id(), error = %err, "客户端命令被拒绝");
                }
            }
            Ok(WsMessage::Ping(data)) => {
                tracing::debug!("收到ping消息，发送pong回应");
                if transport
                    .commands
                    .send(WsCommand::SendPong(data.to_vec()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => {
                tracing::info!("WebSocket收到关闭消息");
                break;
            }
            Ok(WsMessage::Pong(_)) | Ok(WsMessage::Binary(_)) => {}
            Err(err) => {
                tracing::debug!(error = %err, "WebSocket 读取失败");
                break;
            }
        }
    }

    transport.mark_dead();
    session.close().await;
    send_task.abort();

    tracing::info!(user_id = %session.user_id(), "WebSocket连接已断开");
}
