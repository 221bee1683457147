use async_trait::async_trait;

use crate::error::DeliveryError;

/// 客户端连接的发送端
///
/// 入站方向由传输适配器主动调用 `ConnectionSession::handle_message`
/// 和 `ConnectionSession::close`。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 发送一帧文本（JSON）
    async fn deliver(&self, frame: String) -> Result<(), DeliveryError>;

    /// 由存活探测周期性调用
    fn is_alive(&self) -> bool;

    async fn close(&self, code: u16, reason: &str) -> Result<(), DeliveryError>;
}
