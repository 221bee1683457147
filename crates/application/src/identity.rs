use async_trait::async_trait;
use domain::UserProfile;

use crate::error::IdentityError;

/// 身份服务：校验会话并解析用户资料。每个新连接只查询一次。
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn is_session_valid(&self, session_id: &str) -> Result<bool, IdentityError>;

    async fn user_by_session(&self, session_id: &str) -> Result<UserProfile, IdentityError>;
}

pub mod memory {
    use std::collections::HashMap;

    use tokio::sync::RwLock;

    use super::*;

    /// 进程内身份服务，用于测试和本地运行
    #[derive(Default)]
    pub struct MemoryIdentityProvider {
        sessions: RwLock<HashMap<String, UserProfile>>,
    }

    impl MemoryIdentityProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert_session(&self, session_id: impl Into<String>, profile: UserProfile) {
            self.sessions.write().await.insert(session_id.into(), profile);
        }

        pub async fn remove_session(&self, session_id: &str) {
            self.sessions.write().await.remove(session_id);
        }
    }

    #[async_trait]
    impl IdentityProvider for MemoryIdentityProvider {
        async fn is_session_valid(&self, session_id: &str) -> Result<bool, IdentityError> {
            Ok(self.sessions.read().await.contains_key(session_id))
        }

        async fn user_by_session(&self, session_id: &str) -> Result<UserProfile, IdentityError> {
            self.sessions
                .read()
                .await
                .get(session_id)
                .cloned()
                .ok_or(IdentityError::UnknownSession)
        }
    }
}
