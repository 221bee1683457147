use application::{ApplicationError, IdentityError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        match error {
            ApplicationError::Unauthorized
            | ApplicationError::Identity(IdentityError::UnknownSession) => {
                ApiError::unauthorized("invalid session")
            }
            ApplicationError::Identity(err) => {
                ApiError::service_unavailable(format!("identity service error: {err}"))
            }
            ApplicationError::StoreUnavailable(message) => {
                ApiError::service_unavailable(format!("event log unavailable: {message}"))
            }
            ApplicationError::EngineStopped => ApiError::service_unavailable("server shutting down"),
            ApplicationError::InvalidEvent { event_type, reason } => ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_EVENT",
                format!("{event_type}: {reason}"),
            ),
            ApplicationError::MalformedPayload(err) => ApiError::bad_request(err.to_string()),
            other => ApiError::internal_server_error(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
