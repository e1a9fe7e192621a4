//! 用户服务 - 资料读取与好友关系查询的薄封装

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::model::{AuthSession, UserProfile};
use crate::repository::UserRepository;

/// 用户服务
pub struct UserService {
    users: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// 查询用户资料
    pub async fn find_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        self.users.find_profile(user_id).await
    }

    /// 两个用户是否互为好友（建会话前由调用方查询一次）
    pub async fn are_friends(&self, user_a: Uuid, user_b: Uuid) -> Result<bool> {
        self.users.are_friends(user_a, user_b).await
    }

    /// 枚举全部用户（管理/测试流程）
    ///
    /// 需要已验证的登录态，未登录直接拒绝，不会触达底层查询。
    pub async fn list_profiles(&self, session: Option<&AuthSession>) -> Result<Vec<UserProfile>> {
        match session {
            Some(session) if session.verified => self.users.list_profiles().await,
            _ => Err(ChatError::AuthenticationRequired(
                "listing users requires a verified session".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryUserRepository;

    #[tokio::test]
    async fn test_list_profiles_requires_verified_session() {
        let repo = Arc::new(MemoryUserRepository::new());
        repo.insert_profile(UserProfile::new(Uuid::new_v4(), "Ana", "ana")).await;
        let service = UserService::new(repo);

        let err = service.list_profiles(None).await.expect_err("应当拒绝");
        assert!(matches!(err, ChatError::AuthenticationRequired(_)));

        let unverified = AuthSession {
            user_id: Uuid::new_v4(),
            verified: false,
        };
        let err = service
            .list_profiles(Some(&unverified))
            .await
            .expect_err("应当拒绝");
        assert!(matches!(err, ChatError::AuthenticationRequired(_)));

        let verified = AuthSession {
            user_id: Uuid::new_v4(),
            verified: true,
        };
        let profiles = service
            .list_profiles(Some(&verified))
            .await
            .expect("查询失败");
        assert_eq!(profiles.len(), 1);
    }
}
