//! 用户资料/好友关系仓库 - PostgreSQL 实现
//!
//! 资料与好友关系由账号系统拥有，聊天核心只读：
//! 资料用于富化会话/消息展示，好友关系只在建会话时查一次。

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Conversation, UserProfile};

/// 用户仓库 trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 查询用户资料
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>>;

    /// 两个用户是否互为好友
    async fn are_friends(&self, user_a: Uuid, user_b: Uuid) -> Result<bool>;

    /// 枚举全部用户资料（管理/测试流程使用）
    async fn list_profiles(&self) -> Result<Vec<UserProfile>>;
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    user_id: Uuid,
    display_name: String,
    username: String,
    avatar_url: Option<String>,
}

impl ProfileRow {
    fn into_model(self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            display_name: self.display_name,
            username: self.username,
            avatar_url: self.avatar_url,
        }
    }
}

/// 用户仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Arc<PgPool>,
}

impl PgUserRepository {
    /// 创建新的用户仓库
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT user_id, display_name, username, avatar_url \
             FROM fuzo_user_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(ProfileRow::into_model))
    }

    async fn are_friends(&self, user_a: Uuid, user_b: Uuid) -> Result<bool> {
        // 好友关系按规范序单行存储
        let (low, high) = Conversation::canonical_pair(user_a, user_b);
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM fuzo_friendships WHERE user_a = $1 AND user_b = $2)",
        )
        .bind(low)
        .bind(high)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(exists)
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>> {
        let rows = sqlx::query_as::<_, ProfileRow>(
            "SELECT user_id, display_name, username, avatar_url \
             FROM fuzo_user_profiles ORDER BY username",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(ProfileRow::into_model).collect())
    }
}
