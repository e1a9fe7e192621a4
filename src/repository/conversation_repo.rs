//! 会话仓库 - PostgreSQL 实现

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::model::{Conversation, ConversationStatus};

/// 会话仓库 trait
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 根据ID查找会话
    async fn find_by_id(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;

    /// 按参与者对查找会话（入参无需规范序）
    async fn find_by_pair(&self, user_a: Uuid, user_b: Uuid) -> Result<Option<Conversation>>;

    /// 创建或获取会话。返回 (会话, 是否本次新创建)。
    /// 已存在时原样返回，不改状态。
    async fn create_or_get(&self, conversation: &Conversation) -> Result<(Conversation, bool)>;

    /// 更新会话状态与 accepted_at
    async fn update_status(
        &self,
        conversation_id: Uuid,
        status: ConversationStatus,
        accepted_at: Option<DateTime<Utc>>,
    ) -> Result<Conversation>;

    /// 单调推进 last_message_at（取 max(现值, at)，重试/乱序完成不会回退）
    async fn touch_last_message_at(&self, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// 按用户查询指定状态的会话，last_message_at 降序
    async fn list_by_user(
        &self,
        user_id: Uuid,
        status: ConversationStatus,
    ) -> Result<Vec<Conversation>>;

    /// 按用户查询处于任一给定状态的会话 ID 列表
    async fn list_ids_by_user_in(
        &self,
        user_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<Vec<Uuid>>;

    /// 删除会话（测试/清理工具使用，消息级联删除）
    async fn delete(&self, conversation_id: Uuid) -> Result<()>;
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    conversation_id: Uuid,
    participant_a: Uuid,
    participant_b: Uuid,
    status: String,
    initiator_id: Uuid,
    created_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    last_message_at: DateTime<Utc>,
}

impl ConversationRow {
    fn into_model(self) -> Result<Conversation> {
        let status = ConversationStatus::parse(&self.status).ok_or_else(|| {
            ChatError::Database(format!("unknown conversation status: {}", self.status))
        })?;
        Ok(Conversation {
            conversation_id: self.conversation_id,
            participant_a: self.participant_a,
            participant_b: self.participant_b,
            status,
            initiator_id: self.initiator_id,
            created_at: self.created_at,
            accepted_at: self.accepted_at,
            last_message_at: self.last_message_at,
        })
    }
}

const CONVERSATION_COLUMNS: &str = "conversation_id, participant_a, participant_b, status, \
     initiator_id, created_at, accepted_at, last_message_at";

/// 会话仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgConversationRepository {
    pool: Arc<PgPool>,
}

impl PgConversationRepository {
    /// 创建新的会话仓库
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn find_by_id(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {} FROM fuzo_conversations WHERE conversation_id = $1",
            CONVERSATION_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(ConversationRow::into_model).transpose()
    }

    async fn find_by_pair(&self, user_a: Uuid, user_b: Uuid) -> Result<Option<Conversation>> {
        let (low, high) = Conversation::canonical_pair(user_a, user_b);
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {} FROM fuzo_conversations WHERE participant_a = $1 AND participant_b = $2",
            CONVERSATION_COLUMNS
        ))
        .bind(low)
        .bind(high)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(ConversationRow::into_model).transpose()
    }

    async fn create_or_get(&self, conversation: &Conversation) -> Result<(Conversation, bool)> {
        // (participant_a, participant_b) 上有唯一约束；并发创建时冲突方转为读取
        let inserted = sqlx::query_as::<_, ConversationRow>(&format!(
            "INSERT INTO fuzo_conversations \
               (conversation_id, participant_a, participant_b, status, initiator_id, \
                created_at, accepted_at, last_message_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (participant_a, participant_b) DO NOTHING \
             RETURNING {}",
            CONVERSATION_COLUMNS
        ))
        .bind(conversation.conversation_id)
        .bind(conversation.participant_a)
        .bind(conversation.participant_b)
        .bind(conversation.status.as_str())
        .bind(conversation.initiator_id)
        .bind(conversation.created_at)
        .bind(conversation.accepted_at)
        .bind(conversation.last_message_at)
        .fetch_optional(self.pool.as_ref())
        .await?;

        if let Some(row) = inserted {
            return Ok((row.into_model()?, true));
        }

        let existing = self
            .find_by_pair(conversation.participant_a, conversation.participant_b)
            .await?
            .ok_or_else(|| {
                ChatError::Database("conversation insert conflicted but row not found".to_string())
            })?;
        Ok((existing, false))
    }

    async fn update_status(
        &self,
        conversation_id: Uuid,
        status: ConversationStatus,
        accepted_at: Option<DateTime<Utc>>,
    ) -> Result<Conversation> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "UPDATE fuzo_conversations SET status = $2, accepted_at = $3 \
             WHERE conversation_id = $1 RETURNING {}",
            CONVERSATION_COLUMNS
        ))
        .bind(conversation_id)
        .bind(status.as_str())
        .bind(accepted_at)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?
            .into_model()
    }

    async fn touch_last_message_at(&self, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE fuzo_conversations \
             SET last_message_at = GREATEST(last_message_at, $2) \
             WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .bind(at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        status: ConversationStatus,
    ) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {} FROM fuzo_conversations \
             WHERE (participant_a = $1 OR participant_b = $1) AND status = $2 \
             ORDER BY last_message_at DESC",
            CONVERSATION_COLUMNS
        ))
        .bind(user_id)
        .bind(status.as_str())
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(ConversationRow::into_model).collect()
    }

    async fn list_ids_by_user_in(
        &self,
        user_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<Vec<Uuid>> {
        let status_strs: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT conversation_id FROM fuzo_conversations \
             WHERE (participant_a = $1 OR participant_b = $1) AND status = ANY($2)",
        )
        .bind(user_id)
        .bind(status_strs)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(ids)
    }

    async fn delete(&self, conversation_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM fuzo_conversations WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}
