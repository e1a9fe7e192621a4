//! 消息仓库 - PostgreSQL 实现

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Message, SharedItem};

/// 消息仓库 trait
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 插入消息
    async fn insert(&self, message: &Message) -> Result<Message>;

    /// 根据ID查找消息
    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>>;

    /// 按 created_at 降序取至多 limit 条；给定 before 时只取严格更早的
    /// （调用方负责反转为升序返回）
    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>>;

    /// 会话的最近一条消息
    async fn last_message(&self, conversation_id: Uuid) -> Result<Option<Message>>;

    /// 批量置已读：会话内非 reader 发送且未读的消息；返回受影响行数
    async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// 会话内 reader 的未读数
    async fn count_unread(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64>;

    /// 一组会话内 reader 的未读总数
    async fn count_unread_in(&self, conversation_ids: &[Uuid], reader_id: Uuid) -> Result<u64>;

    /// 删除会话全部消息（测试/清理工具使用）
    async fn delete_by_conversation(&self, conversation_id: Uuid) -> Result<u64>;
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    message_id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: Option<String>,
    shared_item: Option<serde_json::Value>,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_model(self) -> Result<Message> {
        let shared_item: Option<SharedItem> = self
            .shared_item
            .map(serde_json::from_value)
            .transpose()?;
        Ok(Message {
            message_id: self.message_id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            shared_item,
            read_at: self.read_at,
            created_at: self.created_at,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "message_id, conversation_id, sender_id, content, shared_item, read_at, created_at";

/// 消息仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgMessageRepository {
    pool: Arc<PgPool>,
}

impl PgMessageRepository {
    /// 创建新的消息仓库
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(&self, message: &Message) -> Result<Message> {
        let shared_item = message
            .shared_item
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "INSERT INTO fuzo_messages \
               (message_id, conversation_id, sender_id, content, shared_item, read_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {}",
            MESSAGE_COLUMNS
        ))
        .bind(message.message_id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(shared_item)
        .bind(message.read_at)
        .bind(message.created_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        row.into_model()
    }

    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {} FROM fuzo_messages WHERE message_id = $1",
            MESSAGE_COLUMNS
        ))
        .bind(message_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(MessageRow::into_model).transpose()
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let rows = match before {
            Some(before) => {
                sqlx::query_as::<_, MessageRow>(&format!(
                    "SELECT {} FROM fuzo_messages \
                     WHERE conversation_id = $1 AND created_at < $2 \
                     ORDER BY created_at DESC LIMIT $3",
                    MESSAGE_COLUMNS
                ))
                .bind(conversation_id)
                .bind(before)
                .bind(limit)
                .fetch_all(self.pool.as_ref())
                .await?
            }
            None => {
                sqlx::query_as::<_, MessageRow>(&format!(
                    "SELECT {} FROM fuzo_messages \
                     WHERE conversation_id = $1 \
                     ORDER BY created_at DESC LIMIT $2",
                    MESSAGE_COLUMNS
                ))
                .bind(conversation_id)
                .bind(limit)
                .fetch_all(self.pool.as_ref())
                .await?
            }
        };

        rows.into_iter().map(MessageRow::into_model).collect()
    }

    async fn last_message(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {} FROM fuzo_messages \
             WHERE conversation_id = $1 ORDER BY created_at DESC LIMIT 1",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(MessageRow::into_model).transpose()
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE fuzo_messages SET read_at = $3 \
             WHERE conversation_id = $1 AND sender_id <> $2 AND read_at IS NULL",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .bind(read_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_unread(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM fuzo_messages \
             WHERE conversation_id = $1 AND sender_id <> $2 AND read_at IS NULL",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(count as u64)
    }

    async fn count_unread_in(&self, conversation_ids: &[Uuid], reader_id: Uuid) -> Result<u64> {
        if conversation_ids.is_empty() {
            return Ok(0);
        }
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM fuzo_messages \
             WHERE conversation_id = ANY($1) AND sender_id <> $2 AND read_at IS NULL",
        )
        .bind(conversation_ids.to_vec())
        .bind(reader_id)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(count as u64)
    }

    async fn delete_by_conversation(&self, conversation_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM fuzo_messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
