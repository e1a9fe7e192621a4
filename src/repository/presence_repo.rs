//! 在线状态仓库 - PostgreSQL 实现
//!
//! 两张表：fuzo_presence_sessions 记录每个 (user, session) 的心跳，
//! fuzo_user_presence 是用户级在线标志（UI 非订阅路径的读源）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{PresenceSession, UserOnlineStatus};

/// 在线状态仓库 trait
#[async_trait]
pub trait PresenceRepository: Send + Sync {
    /// 写入一次会话心跳并把用户标记为在线
    async fn upsert_activity(&self, session: &PresenceSession, at: DateTime<Utc>) -> Result<()>;

    /// 指定会话下线；返回该用户是否因此完全离线
    async fn mark_offline(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// 读取用户在线状态（无记录返回 None）
    async fn get_status(&self, user_id: Uuid) -> Result<Option<UserOnlineStatus>>;

    /// 批量读取在线状态
    async fn batch_get_status(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, UserOnlineStatus>>;

    /// 清扫心跳早于 cutoff 的会话；返回 (下线的会话数, 因此完全离线的用户)
    async fn sweep_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(u64, Vec<Uuid>)>;
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    user_id: Uuid,
    is_online: bool,
    last_activity_at: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
}

impl StatusRow {
    fn into_model(self) -> UserOnlineStatus {
        UserOnlineStatus {
            user_id: self.user_id,
            is_online: self.is_online,
            last_activity_at: self.last_activity_at,
            last_seen: self.last_seen,
        }
    }
}

/// 在线状态仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgPresenceRepository {
    pool: Arc<PgPool>,
}

impl PgPresenceRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PresenceRepository for PgPresenceRepository {
    async fn upsert_activity(&self, session: &PresenceSession, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO fuzo_presence_sessions \
               (user_id, session_id, browser, os, device_type, started_at, last_heartbeat) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, session_id) DO UPDATE SET last_heartbeat = $7",
        )
        .bind(session.user_id)
        .bind(session.session_id)
        .bind(&session.device_info.browser)
        .bind(&session.device_info.os)
        .bind(session.device_info.device_type.as_str())
        .bind(session.started_at)
        .bind(at)
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "INSERT INTO fuzo_user_presence (user_id, is_online, last_activity_at, last_seen) \
             VALUES ($1, TRUE, $2, $2) \
             ON CONFLICT (user_id) DO UPDATE \
               SET is_online = TRUE, last_activity_at = $2, last_seen = $2",
        )
        .bind(session.user_id)
        .bind(at)
        .execute(self.pool.as_ref())
        .await?;

        debug!("💓 activity upsert: user={}, session={}", session.user_id, session.session_id);
        Ok(())
    }

    async fn mark_offline(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        sqlx::query(
            "DELETE FROM fuzo_presence_sessions WHERE user_id = $1 AND session_id = $2",
        )
        .bind(user_id)
        .bind(session_id)
        .execute(self.pool.as_ref())
        .await?;

        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM fuzo_presence_sessions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        // 多设备：还有其他活跃会话时保持在线
        if remaining > 0 {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE fuzo_user_presence SET is_online = FALSE, last_seen = $2 WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(true)
    }

    async fn get_status(&self, user_id: Uuid) -> Result<Option<UserOnlineStatus>> {
        let row = sqlx::query_as::<_, StatusRow>(
            "SELECT user_id, is_online, last_activity_at, last_seen \
             FROM fuzo_user_presence WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(StatusRow::into_model))
    }

    async fn batch_get_status(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, UserOnlineStatus>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, StatusRow>(
            "SELECT user_id, is_online, last_activity_at, last_seen \
             FROM fuzo_user_presence WHERE user_id = ANY($1)",
        )
        .bind(user_ids.to_vec())
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.user_id, row.into_model()))
            .collect())
    }

    async fn sweep_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(u64, Vec<Uuid>)> {
        let swept: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM fuzo_presence_sessions WHERE last_heartbeat < $1 RETURNING user_id",
        )
        .bind(cutoff)
        .fetch_all(self.pool.as_ref())
        .await?;

        if swept.is_empty() {
            return Ok((0, Vec::new()));
        }

        let mut candidates: Vec<Uuid> = swept.clone();
        candidates.sort();
        candidates.dedup();

        // 只有不剩任何会话的用户才真正转为离线
        let users_offline: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE fuzo_user_presence p \
             SET is_online = FALSE, last_seen = COALESCE(p.last_activity_at, $2) \
             WHERE p.user_id = ANY($1) AND p.is_online \
               AND NOT EXISTS (SELECT 1 FROM fuzo_presence_sessions s WHERE s.user_id = p.user_id) \
             RETURNING p.user_id",
        )
        .bind(candidates)
        .bind(now)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok((swept.len() as u64, users_offline))
    }
}
