use domain::DomainError;
use thiserror::Error;

/// 日志存储后端错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogStoreError {
    /// 连接丢失或尚未建立
    #[error("log store unavailable: {0}")]
    Unavailable(String),
    #[error("log store backend error: {0}")]
    Backend(String),
}

impl LogStoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        LogStoreError::Unavailable(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        LogStoreError::Backend(message.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("unknown session")]
    UnknownSession,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("invalid identity response: {0}")]
    InvalidResponse(String),
}

/// 传输层发送或关闭失败，只影响对应连接
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 被授权器拒绝，未写入日志
    #[error("invalid event {event_type}: {reason}")]
    InvalidEvent {
        event_type: &'static str,
        reason: &'static str,
    },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] DomainError),
    #[error("delivery failure: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("unauthorized session")]
    Unauthorized,
    #[error("chat engine stopped")]
    EngineStopped,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApplicationError {
    pub fn invalid_event(event_type: &'static str, reason: &'static str) -> Self {
        ApplicationError::InvalidEvent { event_type, reason }
    }

    pub fn is_invalid_event(&self) -> bool {
        matches!(self, ApplicationError::InvalidEvent { .. })
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, ApplicationError::StoreUnavailable(_))
    }
}

impl From<LogStoreError> for ApplicationError {
    fn from(value: LogStoreError) -> Self {
        match value {
            LogStoreError::Unavailable(message) => ApplicationError::StoreUnavailable(message),
            LogStoreError::Backend(message) => ApplicationError::Store(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_application_errors() {
        let err: ApplicationError = LogStoreError::unavailable("connection refused").into();
        assert!(err.is_store_unavailable());

        let err: ApplicationError = LogStoreError::backend("NOSCRIPT").into();
        assert!(matches!(err, ApplicationError::Store(message) if message == "NOSCRIPT"));
    }

    #[test]
    fn test_invalid_event_message() {
        let err = ApplicationError::invalid_event("MESSAGE_RECEIVED", "message content is empty");
        assert_eq!(
            err.to_string(),
            "invalid event MESSAGE_RECEIVED: message content is empty"
        );
    }
}
