//! 聊天状态容器 - 单个客户端会话的内存聚合状态
//!
//! 持有会话列表与按会话的消息列表，把会话服务与实时订阅编排起来，
//! 向 UI 暴露命令式操作。读取失败收敛为日志 + loading 标志复位，
//! 不向 UI 抛错。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::infra::subscription_manager::{
    MessageCallback, RefreshCallback, Subscription, SubscriptionManager,
};
use crate::model::{ConversationSummary, Message, SharedItem};
use crate::service::{ConversationService, NotificationBridge};

/// 聊天状态容器
#[derive(Clone)]
pub struct ChatStore {
    service: Arc<ConversationService>,
    subscriptions: Arc<SubscriptionManager>,
    conversations: Arc<RwLock<Vec<ConversationSummary>>>,
    messages: Arc<RwLock<HashMap<Uuid, Vec<Message>>>>,
    loading_conversations: Arc<AtomicBool>,
    loading_messages: Arc<AtomicBool>,
    active_conversation: Arc<Mutex<Option<Uuid>>>,
}

impl ChatStore {
    pub fn new(service: Arc<ConversationService>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            service,
            subscriptions,
            conversations: Arc::new(RwLock::new(Vec::new())),
            messages: Arc::new(RwLock::new(HashMap::new())),
            loading_conversations: Arc::new(AtomicBool::new(false)),
            loading_messages: Arc::new(AtomicBool::new(false)),
            active_conversation: Arc::new(Mutex::new(None)),
        }
    }

    /// 拉取会话列表并整体替换本地状态
    pub async fn load_conversations(&self, user_id: Uuid) {
        self.loading_conversations.store(true, Ordering::SeqCst);
        match self.service.fetch_conversations(user_id).await {
            Ok(summaries) => {
                *self.conversations.write() = summaries;
            }
            Err(e) => warn!("⚠️ 会话列表加载失败: user={}, {}", user_id, e),
        }
        self.loading_conversations.store(false, Ordering::SeqCst);
    }

    /// 拉取某会话的消息并整体替换该会话的本地列表
    pub async fn load_messages(&self, conversation_id: Uuid) {
        self.loading_messages.store(true, Ordering::SeqCst);
        match self.service.fetch_messages(conversation_id, None, None).await {
            Ok(page) => {
                self.messages.write().insert(conversation_id, page);
            }
            Err(e) => warn!("⚠️ 消息加载失败: conversation={}, {}", conversation_id, e),
        }
        self.loading_messages.store(false, Ordering::SeqCst);
    }

    /// 订阅某会话的新消息，按到达顺序追加到本地列表
    ///
    /// 返回订阅句柄，由调用方在卸载/切换会话时取消。
    pub async fn subscribe_to_conversation(&self, conversation_id: Uuid) -> Result<Subscription> {
        *self.active_conversation.lock() = Some(conversation_id);

        let messages = Arc::clone(&self.messages);
        let on_message: MessageCallback = Arc::new(move |message: Message| {
            let messages = Arc::clone(&messages);
            Box::pin(async move {
                messages
                    .write()
                    .entry(message.conversation_id)
                    .or_default()
                    .push(message);
            })
        });

        self.subscriptions
            .subscribe_to_messages(conversation_id, on_message)
            .await
    }

    /// 订阅会话表变更，事件到达时重新拉取会话列表
    pub async fn subscribe_to_conversation_updates(&self, user_id: Uuid) -> Result<Subscription> {
        let store = self.clone();
        let on_update: RefreshCallback = Arc::new(move || {
            let store = store.clone();
            Box::pin(async move {
                store.load_conversations(user_id).await;
            })
        });

        self.subscriptions
            .subscribe_to_conversations(user_id, on_update)
            .await
    }

    /// 发送文本消息
    ///
    /// 不直接把响应追加到本地：消息经实时订阅回流，
    /// 发送方与接收方共用同一条追加路径，线程顺序只有一个来源。
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: String,
    ) -> Result<()> {
        self.service
            .send_message(conversation_id, sender_id, content)
            .await?;
        Ok(())
    }

    /// 发送分享项
    pub async fn share_item(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        shared_item: SharedItem,
        caption: Option<String>,
    ) -> Result<()> {
        self.service
            .share_item(conversation_id, sender_id, shared_item, caption)
            .await?;
        Ok(())
    }

    /// 批量已读；不乐观清零未读角标，等下一次会话列表刷新
    pub async fn mark_as_read(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
        self.service.mark_as_read(conversation_id, user_id).await?;
        Ok(())
    }

    /// 把用户级消息订阅接到通知桥上
    pub async fn subscribe_to_unread_count(
        &self,
        user_id: Uuid,
        bridge: &NotificationBridge,
    ) -> Result<Subscription> {
        self.subscriptions
            .subscribe_to_user_messages(user_id, bridge.message_callback())
            .await
    }

    // ==================== 状态读取 ====================

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.conversations.read().clone()
    }

    pub fn messages_for(&self, conversation_id: Uuid) -> Vec<Message> {
        self.messages
            .read()
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_loading_conversations(&self) -> bool {
        self.loading_conversations.load(Ordering::SeqCst)
    }

    pub fn is_loading_messages(&self) -> bool {
        self.loading_messages.load(Ordering::SeqCst)
    }

    pub fn active_conversation(&self) -> Option<Uuid> {
        *self.active_conversation.lock()
    }
}
