//! 内存仓库实现（测试与本地开发使用）

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::model::{
    Conversation, ConversationStatus, Message, PresenceSession, UserOnlineStatus, UserProfile,
};
use crate::repository::conversation_repo::ConversationRepository;
use crate::repository::message_repo::MessageRepository;
use crate::repository::presence_repo::PresenceRepository;
use crate::repository::user_repo::UserRepository;

/// 会话仓库（内存实现）
pub struct MemoryConversationRepository {
    rows: Arc<RwLock<HashMap<Uuid, Conversation>>>,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryConversationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn find_by_id(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.rows.read().await.get(&conversation_id).cloned())
    }

    async fn find_by_pair(&self, user_a: Uuid, user_b: Uuid) -> Result<Option<Conversation>> {
        let (low, high) = Conversation::canonical_pair(user_a, user_b);
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|c| c.participant_a == low && c.participant_b == high)
            .cloned())
    }

    async fn create_or_get(&self, conversation: &Conversation) -> Result<(Conversation, bool)> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows
            .values()
            .find(|c| {
                c.participant_a == conversation.participant_a
                    && c.participant_b == conversation.participant_b
            })
            .cloned()
        {
            return Ok((existing, false));
        }
        rows.insert(conversation.conversation_id, conversation.clone());
        Ok((conversation.clone(), true))
    }

    async fn update_status(
        &self,
        conversation_id: Uuid,
        status: ConversationStatus,
        accepted_at: Option<DateTime<Utc>>,
    ) -> Result<Conversation> {
        let mut rows = self.rows.write().await;
        let conversation = rows
            .get_mut(&conversation_id)
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
        conversation.status = status;
        conversation.accepted_at = accepted_at;
        Ok(conversation.clone())
    }

    async fn touch_last_message_at(&self, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut rows = self.rows.write().await;
        if let Some(conversation) = rows.get_mut(&conversation_id) {
            // 单调推进，乱序完成不会回退
            if at > conversation.last_message_at {
                conversation.last_message_at = at;
            }
        }
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        status: ConversationStatus,
    ) -> Result<Vec<Conversation>> {
        let mut list: Vec<Conversation> = self
            .rows
            .read()
            .await
            .values()
            .filter(|c| c.involves(user_id) && c.status == status)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(list)
    }

    async fn list_ids_by_user_in(
        &self,
        user_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<Vec<Uuid>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|c| c.involves(user_id) && statuses.contains(&c.status))
            .map(|c| c.conversation_id)
            .collect())
    }

    async fn delete(&self, conversation_id: Uuid) -> Result<()> {
        self.rows.write().await.remove(&conversation_id);
        Ok(())
    }
}

/// 消息仓库（内存实现）
pub struct MemoryMessageRepository {
    rows: Arc<RwLock<HashMap<Uuid, Message>>>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryMessageRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(a: &Message, b: &Message) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.message_id.cmp(&a.message_id))
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn insert(&self, message: &Message) -> Result<Message> {
        self.rows
            .write()
            .await
            .insert(message.message_id, message.clone());
        Ok(message.clone())
    }

    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>> {
        Ok(self.rows.read().await.get(&message_id).cloned())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let mut list: Vec<Message> = self
            .rows
            .read()
            .await
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| before.map_or(true, |cutoff| m.created_at < cutoff))
            .cloned()
            .collect();
        list.sort_by(newest_first);
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }

    async fn last_message(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        Ok(self
            .list_by_conversation(conversation_id, 1, None)
            .await?
            .into_iter()
            .next())
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut affected = 0;
        for message in rows.values_mut() {
            if message.conversation_id == conversation_id
                && message.sender_id != reader_id
                && message.read_at.is_none()
            {
                message.read_at = Some(read_at);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn count_unread(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && m.sender_id != reader_id
                    && m.read_at.is_none()
            })
            .count() as u64)
    }

    async fn count_unread_in(&self, conversation_ids: &[Uuid], reader_id: Uuid) -> Result<u64> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|m| {
                conversation_ids.contains(&m.conversation_id)
                    && m.sender_id != reader_id
                    && m.read_at.is_none()
            })
            .count() as u64)
    }

    async fn delete_by_conversation(&self, conversation_id: Uuid) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, m| m.conversation_id != conversation_id);
        Ok((before - rows.len()) as u64)
    }
}

/// 用户仓库（内存实现）
pub struct MemoryUserRepository {
    profiles: Arc<RwLock<HashMap<Uuid, UserProfile>>>,
    friendships: Arc<RwLock<HashSet<(Uuid, Uuid)>>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self {
            profiles: Arc::new(RwLock::new(HashMap::new())),
            friendships: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// 写入一条用户资料（测试数据准备）
    pub async fn insert_profile(&self, profile: UserProfile) {
        self.profiles.write().await.insert(profile.user_id, profile);
    }

    /// 建立好友关系（测试数据准备）
    pub async fn set_friends(&self, user_a: Uuid, user_b: Uuid) {
        self.friendships
            .write()
            .await
            .insert(Conversation::canonical_pair(user_a, user_b));
    }
}

impl Default for MemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(&user_id).cloned())
    }

    async fn are_friends(&self, user_a: Uuid, user_b: Uuid) -> Result<bool> {
        Ok(self
            .friendships
            .read()
            .await
            .contains(&Conversation::canonical_pair(user_a, user_b)))
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>> {
        let mut list: Vec<UserProfile> = self.profiles.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(list)
    }
}

/// 在线状态仓库（内存实现）
pub struct MemoryPresenceRepository {
    sessions: Arc<RwLock<HashMap<(Uuid, Uuid), DateTime<Utc>>>>,
    statuses: Arc<RwLock<HashMap<Uuid, UserOnlineStatus>>>,
}

impl MemoryPresenceRepository {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            statuses: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryPresenceRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceRepository for MemoryPresenceRepository {
    async fn upsert_activity(&self, session: &PresenceSession, at: DateTime<Utc>) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert((session.user_id, session.session_id), at);

        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(session.user_id)
            .or_insert_with(|| UserOnlineStatus::offline(session.user_id));
        status.is_online = true;
        status.last_activity_at = Some(at);
        status.last_seen = Some(at);
        Ok(())
    }

    async fn mark_offline(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&(user_id, session_id));
        let remaining = sessions.keys().any(|(uid, _)| *uid == user_id);
        drop(sessions);

        if remaining {
            return Ok(false);
        }

        let mut statuses = self.statuses.write().await;
        if let Some(status) = statuses.get_mut(&user_id) {
            status.is_online = false;
            status.last_seen = Some(at);
        }
        Ok(true)
    }

    async fn get_status(&self, user_id: Uuid) -> Result<Option<UserOnlineStatus>> {
        Ok(self.statuses.read().await.get(&user_id).cloned())
    }

    async fn batch_get_status(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, UserOnlineStatus>> {
        let statuses = self.statuses.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| statuses.get(id).map(|s| (*id, s.clone())))
            .collect())
    }

    async fn sweep_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(u64, Vec<Uuid>)> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let mut candidates: HashSet<Uuid> = HashSet::new();
        sessions.retain(|(user_id, _), heartbeat| {
            if *heartbeat < cutoff {
                candidates.insert(*user_id);
                false
            } else {
                true
            }
        });
        let swept = (before - sessions.len()) as u64;

        let mut users_offline = Vec::new();
        let mut statuses = self.statuses.write().await;
        for user_id in candidates {
            let still_live = sessions.keys().any(|(uid, _)| *uid == user_id);
            if still_live {
                continue;
            }
            if let Some(status) = statuses.get_mut(&user_id) {
                if status.is_online {
                    status.is_online = false;
                    status.last_seen = status.last_activity_at.or(Some(now));
                    users_offline.push(user_id);
                }
            }
        }

        Ok((swept, users_offline))
    }
}
