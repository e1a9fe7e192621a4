//! 会话服务 - 私信会话的生命周期与消息收发
//!
//! 提供的能力：
//! - 会话创建（幂等，消息请求 pending/active/declined 状态机）
//! - 消息发送 / 分享项发送
//! - 会话列表 / 消息请求列表（含对方资料、最近消息、未读数富化）
//! - 消息分页拉取与批量已读
//!
//! 写入提交后向变更流中心发布事件，实时订阅方由此拿到推送。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::infra::change_hub::{ChangeEvent, ChangeHub, ChangeKind};
use crate::infra::metrics;
use crate::model::{
    Conversation, ConversationStatus, ConversationSummary, Message, SharedItem, UserProfile,
};
use crate::repository::{ConversationRepository, MessageRepository, UserRepository};

/// 消息分页默认条数
const DEFAULT_MESSAGE_PAGE: i64 = 50;

/// 会话服务
pub struct ConversationService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    users: Arc<dyn UserRepository>,
    hub: Arc<ChangeHub>,
}

impl ConversationService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        users: Arc<dyn UserRepository>,
        hub: Arc<ChangeHub>,
    ) -> Self {
        Self {
            conversations,
            messages,
            users,
            hub,
        }
    }

    /// 创建或获取与对方的会话（幂等）
    ///
    /// 参与者对归一化后查找；已存在时原样返回，不会重新激活也不改状态。
    /// 新建时：互为好友直接 active 并填 accepted_at，否则 pending，
    /// initiator_id 记录发起方。
    pub async fn get_or_create_conversation(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
        is_friend: bool,
    ) -> Result<Conversation> {
        if user_id == other_user_id {
            return Err(ChatError::Validation(
                "cannot open a conversation with yourself".to_string(),
            ));
        }

        let candidate = Conversation::new(user_id, other_user_id, is_friend);
        let (conversation, created) = self.conversations.create_or_get(&candidate).await?;

        if created {
            info!(
                "💬 新会话已创建: {} ({} -> {}, status={})",
                conversation.conversation_id,
                user_id,
                other_user_id,
                conversation.status.as_str()
            );
            self.hub.publish(ChangeEvent::conversation(
                ChangeKind::Insert,
                conversation.clone(),
            ));
        }

        Ok(conversation)
    }

    /// 接受消息请求：pending -> active，写入 accepted_at
    ///
    /// 对已 active 的会话重复调用只是重写同样的字段（效果幂等）。
    pub async fn accept_message_request(&self, conversation_id: Uuid) -> Result<Conversation> {
        let existing = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;

        // declined 是终态
        if existing.status == ConversationStatus::Declined {
            return Err(ChatError::Validation(
                "declined conversation cannot be accepted".to_string(),
            ));
        }

        let conversation = self
            .conversations
            .update_status(conversation_id, ConversationStatus::Active, Some(Utc::now()))
            .await?;

        info!("✅ 消息请求已接受: {}", conversation_id);
        self.hub.publish(ChangeEvent::conversation(
            ChangeKind::Update,
            conversation.clone(),
        ));
        Ok(conversation)
    }

    /// 拒绝消息请求：pending -> declined（终态）
    pub async fn decline_message_request(&self, conversation_id: Uuid) -> Result<Conversation> {
        let existing = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;

        match existing.status {
            // 重复拒绝无额外效果
            ConversationStatus::Declined => return Ok(existing),
            ConversationStatus::Active => {
                return Err(ChatError::Validation(
                    "only pending requests can be declined".to_string(),
                ));
            }
            ConversationStatus::Pending => {}
        }

        let conversation = self
            .conversations
            .update_status(conversation_id, ConversationStatus::Declined, None)
            .await?;

        info!("🚫 消息请求已拒绝: {}", conversation_id);
        self.hub.publish(ChangeEvent::conversation(
            ChangeKind::Update,
            conversation.clone(),
        ));
        Ok(conversation)
    }

    /// 用户的待处理消息请求列表
    ///
    /// pending 请求的消息在接受之前不计入未读，unread_count 固定为 0。
    pub async fn fetch_pending_requests(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        let pending = self
            .conversations
            .list_by_user(user_id, ConversationStatus::Pending)
            .await?;

        let mut summaries = Vec::with_capacity(pending.len());
        for conversation in pending {
            summaries.push(self.summarize(conversation, user_id, 0).await?);
        }
        Ok(summaries)
    }

    /// 用户的活跃会话列表，last_message_at 降序
    pub async fn fetch_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        let active = self
            .conversations
            .list_by_user(user_id, ConversationStatus::Active)
            .await?;

        let mut summaries = Vec::with_capacity(active.len());
        for conversation in active {
            let unread = self
                .messages
                .count_unread(conversation.conversation_id, user_id)
                .await?;
            summaries.push(self.summarize(conversation, user_id, unread).await?);
        }
        Ok(summaries)
    }

    /// 拉取会话消息，按 created_at 升序返回
    ///
    /// 底层按新到旧取 limit 条再反转，给定 before 时只取严格更早的，
    /// 用于"加载更早消息"的游标分页。
    pub async fn fetch_messages(
        &self,
        conversation_id: Uuid,
        limit: Option<i64>,
        before: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let limit = limit.unwrap_or(DEFAULT_MESSAGE_PAGE);
        let mut page = self
            .messages
            .list_by_conversation(conversation_id, limit, before)
            .await?;
        page.reverse();
        Ok(page)
    }

    /// 发送文本消息
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: String,
    ) -> Result<Message> {
        let conversation = self.load_for_sender(conversation_id, sender_id).await?;
        let message = Message::new_text(conversation_id, sender_id, content);
        let message = self.persist_and_announce(conversation, message).await?;
        metrics::record_message_sent();
        Ok(message)
    }

    /// 发送分享项（可附带文字说明）
    pub async fn share_item(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        shared_item: SharedItem,
        caption: Option<String>,
    ) -> Result<Message> {
        let conversation = self.load_for_sender(conversation_id, sender_id).await?;
        let kind = shared_item.kind();
        let message = Message::new_share(conversation_id, sender_id, shared_item, caption);
        let message = self.persist_and_announce(conversation, message).await?;
        metrics::record_item_shared(kind);
        Ok(message)
    }

    /// 批量已读：会话内非本人发送且未读的消息全部置 read_at（幂等）
    pub async fn mark_as_read(&self, conversation_id: Uuid, user_id: Uuid) -> Result<u64> {
        let affected = self
            .messages
            .mark_read(conversation_id, user_id, Utc::now())
            .await?;
        if affected > 0 {
            info!(
                "📖 已读标记: conversation={}, user={}, affected={}",
                conversation_id, user_id, affected
            );
        }
        Ok(affected)
    }

    /// 用户全局未读总数（pending 与 active 会话都计入）
    pub async fn get_unread_count(&self, user_id: Uuid) -> Result<u64> {
        let ids = self
            .conversations
            .list_ids_by_user_in(
                user_id,
                &[ConversationStatus::Pending, ConversationStatus::Active],
            )
            .await?;
        self.messages.count_unread_in(&ids, user_id).await
    }

    /// 删除会话及其全部消息（测试/清理工具使用，正常流程不删除）
    pub async fn delete_conversation(&self, conversation_id: Uuid) -> Result<()> {
        let existing = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;

        let removed = self.messages.delete_by_conversation(conversation_id).await?;
        self.conversations.delete(conversation_id).await?;

        info!(
            "🗑️ 会话已删除: {} (级联删除 {} 条消息)",
            conversation_id, removed
        );
        self.hub
            .publish(ChangeEvent::conversation(ChangeKind::Delete, existing));
        Ok(())
    }

    /// 校验会话存在且发送者是参与者
    async fn load_for_sender(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
    ) -> Result<Conversation> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;

        if !conversation.involves(sender_id) {
            return Err(ChatError::Validation(format!(
                "user {} is not a participant of conversation {}",
                sender_id, conversation_id
            )));
        }
        Ok(conversation)
    }

    /// 落库消息并推进会话时间戳，然后发布变更事件
    ///
    /// 两次写入不在同一事务里：消息落库后时间戳更新失败只会让
    /// last_message_at 暂时偏旧，下次发送自愈，不向调用方报错。
    async fn persist_and_announce(
        &self,
        conversation: Conversation,
        message: Message,
    ) -> Result<Message> {
        let message = self.messages.insert(&message).await?;

        if let Err(e) = self
            .conversations
            .touch_last_message_at(message.conversation_id, message.created_at)
            .await
        {
            warn!(
                "⚠️ 更新会话 last_message_at 失败: conversation={}, {}",
                message.conversation_id, e
            );
        }

        self.hub.publish(ChangeEvent::message_insert(message.clone()));

        let mut refreshed = conversation;
        if message.created_at > refreshed.last_message_at {
            refreshed.last_message_at = message.created_at;
        }
        self.hub
            .publish(ChangeEvent::conversation(ChangeKind::Update, refreshed));

        Ok(message)
    }

    /// 组装会话的读取视图：对方资料 + 最近消息 + 未读数
    async fn summarize(
        &self,
        conversation: Conversation,
        for_user: Uuid,
        unread_count: u64,
    ) -> Result<ConversationSummary> {
        let other_id = conversation.other_participant(for_user).ok_or_else(|| {
            ChatError::Validation(format!(
                "user {} is not a participant of conversation {}",
                for_user, conversation.conversation_id
            ))
        })?;

        let other_user = self
            .users
            .find_profile(other_id)
            .await?
            .unwrap_or_else(|| UserProfile::unknown(other_id));
        let last_message = self.messages.last_message(conversation.conversation_id).await?;

        Ok(ConversationSummary {
            conversation,
            other_user,
            last_message,
            unread_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{
        MemoryConversationRepository, MemoryMessageRepository, MemoryUserRepository,
    };

    fn service() -> ConversationService {
        ConversationService::new(
            Arc::new(MemoryConversationRepository::new()),
            Arc::new(MemoryMessageRepository::new()),
            Arc::new(MemoryUserRepository::new()),
            Arc::new(ChangeHub::default()),
        )
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_order_independent() {
        let service = service();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let first = service
            .get_or_create_conversation(a, b, false)
            .await
            .expect("创建失败");
        let second = service
            .get_or_create_conversation(b, a, false)
            .await
            .expect("获取失败");

        // 参数顺序相反也落到同一行，且第二次不改状态
        assert_eq!(first.conversation_id, second.conversation_id);
        assert_eq!(second.status, ConversationStatus::Pending);
        assert_eq!(second.initiator_id, a);
    }

    #[tokio::test]
    async fn test_self_conversation_rejected() {
        let service = service();
        let a = Uuid::new_v4();

        let err = service
            .get_or_create_conversation(a, a, false)
            .await
            .expect_err("应当拒绝");
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn test_declined_is_terminal() {
        let service = service();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let conv = service
            .get_or_create_conversation(a, b, false)
            .await
            .expect("创建失败");
        service
            .decline_message_request(conv.conversation_id)
            .await
            .expect("拒绝失败");

        // declined 之后不能再接受
        let err = service
            .accept_message_request(conv.conversation_id)
            .await
            .expect_err("应当拒绝");
        assert!(matches!(err, ChatError::Validation(_)));

        // 重复拒绝无额外效果
        let again = service
            .decline_message_request(conv.conversation_id)
            .await
            .expect("重复拒绝失败");
        assert_eq!(again.status, ConversationStatus::Declined);
    }

    #[tokio::test]
    async fn test_send_requires_participant() {
        let service = service();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let conv = service
            .get_or_create_conversation(a, b, true)
            .await
            .expect("创建失败");

        let err = service
            .send_message(conv.conversation_id, Uuid::new_v4(), "hi".to_string())
            .await
            .expect_err("非参与者应当被拒绝");
        assert!(matches!(err, ChatError::Validation(_)));
    }
}
