//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 持久化记录或客户端负载无法解析
    #[error("malformed payload: {message}")]
    MalformedPayload { message: String },

    /// 标识符不合法
    #[error("invalid identifier for {field}: {reason}")]
    InvalidIdentifier { field: &'static str, reason: String },
}

impl DomainError {
    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            message: message.into(),
        }
    }

    pub fn invalid_identifier(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            field,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::malformed_payload(err.to_string())
    }
}

/// 领域层结果类型
pub type DomainResult<T> = Result<T, DomainError>;
