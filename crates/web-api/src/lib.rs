//! Web API 层。
//!
//! 提供 Axum 路由：`/ws` 把 WebSocket 连接接入聊天引擎，`/health` 报告投影版本。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
pub use ws_connection::WsTransport;
