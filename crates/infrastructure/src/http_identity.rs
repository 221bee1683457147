//! 通过 HTTP 访问外部身份服务

use std::time::Duration;

use application::{IdentityError, IdentityProvider};
use async_trait::async_trait;
use domain::UserProfile;
use reqwest::StatusCode;
use tracing::debug;

pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    /// `GET {base}/isSessionValid`，会话 ID 放在 `sessionId` 头里，2xx 即有效
    async fn is_session_valid(&self, session_id: &str) -> Result<bool, IdentityError> {
        let response = self
            .client
            .get(format!("{}/isSessionValid", self.base_url))
            .header("sessionId", session_id)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let status = response.status();
        debug!(status = %status, "session validation response");
        if status.is_success() {
            Ok(true)
        } else if status.is_client_error() {
            Ok(false)
        } else {
            Err(IdentityError::Unavailable(format!(
                "identity service returned {status}"
            )))
        }
    }

    async fn user_by_session(&self, session_id: &str) -> Result<UserProfile, IdentityError> {
        let response = self
            .client
            .get(format!("{}/user/{}", self.base_url, session_id))
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<UserProfile>()
                .await
                .map_err(|e| IdentityError::InvalidResponse(e.to_string())),
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(IdentityError::UnknownSession)
            }
            status => Err(IdentityError::Unavailable(format!(
                "identity service returned {status}"
            ))),
        }
    }
}
