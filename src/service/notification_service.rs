//! 通知桥 - 把新到消息转成用户可见的提醒
//!
//! 观察用户级消息流，对每条非本人发送的新消息触发一次提醒回调。
//! 同一条消息可能经多路订阅重复到达，按消息 ID 用有界最近集去重。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::infra::metrics;
use crate::infra::subscription_manager::MessageCallback;
use crate::model::{Message, UserProfile};
use crate::repository::UserRepository;

/// 最近消息 ID 集上限，超出后淘汰最旧的
const DEFAULT_RECENT_CAP: usize = 100;
/// 定期裁剪的保留条数
const DEFAULT_TRIM_TO: usize = 50;

/// 用户可见的提醒
#[derive(Debug, Clone)]
pub struct ChatAlert {
    /// 点开提醒直接进入的会话
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub sender: UserProfile,
    pub preview: String,
}

/// 提醒回调（由 UI 层注册，渲染 toast 等）
pub type AlertCallback = Arc<dyn Fn(ChatAlert) + Send + Sync>;

struct RecentIds {
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

/// 通知桥
pub struct NotificationBridge {
    current_user: Uuid,
    users: Arc<dyn UserRepository>,
    on_alert: AlertCallback,
    recent: Arc<Mutex<RecentIds>>,
    recent_cap: usize,
    trim_to: usize,
}

impl Clone for NotificationBridge {
    fn clone(&self) -> Self {
        Self {
            current_user: self.current_user,
            users: Arc::clone(&self.users),
            on_alert: Arc::clone(&self.on_alert),
            recent: Arc::clone(&self.recent),
            recent_cap: self.recent_cap,
            trim_to: self.trim_to,
        }
    }
}

impl NotificationBridge {
    pub fn new(
        current_user: Uuid,
        users: Arc<dyn UserRepository>,
        on_alert: AlertCallback,
    ) -> Self {
        Self {
            current_user,
            users,
            on_alert,
            recent: Arc::new(Mutex::new(RecentIds {
                seen: HashSet::new(),
                order: VecDeque::new(),
            })),
            recent_cap: DEFAULT_RECENT_CAP,
            trim_to: DEFAULT_TRIM_TO,
        }
    }

    /// 调整去重集容量（测试用）
    pub fn with_limits(mut self, recent_cap: usize, trim_to: usize) -> Self {
        self.recent_cap = recent_cap;
        self.trim_to = trim_to;
        self
    }

    /// 观察一条新到消息，必要时触发提醒
    pub async fn observe(&self, message: Message) {
        if message.sender_id == self.current_user {
            return;
        }

        if !self.remember(message.message_id) {
            debug!("🔄 通知去重命中: message={}", message.message_id);
            metrics::record_notification_deduped();
            return;
        }

        let sender = self
            .users
            .find_profile(message.sender_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| UserProfile::unknown(message.sender_id));

        let alert = ChatAlert {
            conversation_id: message.conversation_id,
            message_id: message.message_id,
            preview: preview_text(&message),
            sender,
        };

        (self.on_alert)(alert);
        metrics::record_notification_emitted();
    }

    /// 包装成消息回调，便于接到用户级消息订阅上
    pub fn message_callback(&self) -> MessageCallback {
        let bridge = self.clone();
        Arc::new(move |message: Message| {
            let bridge = bridge.clone();
            Box::pin(async move {
                bridge.observe(message).await;
            })
        })
    }

    /// 记录消息 ID；返回 false 表示重复
    fn remember(&self, message_id: Uuid) -> bool {
        let mut recent = self.recent.lock();
        if recent.seen.contains(&message_id) {
            return false;
        }
        recent.seen.insert(message_id);
        recent.order.push_back(message_id);
        while recent.order.len() > self.recent_cap {
            if let Some(evicted) = recent.order.pop_front() {
                recent.seen.remove(&evicted);
            }
        }
        true
    }

    /// 把最近集裁剪到保留条数（定时任务的兜底）
    pub fn trim_recent(&self) {
        let mut recent = self.recent.lock();
        while recent.order.len() > self.trim_to {
            if let Some(evicted) = recent.order.pop_front() {
                recent.seen.remove(&evicted);
            }
        }
    }

    /// 当前去重集大小
    pub fn recent_len(&self) -> usize {
        self.recent.lock().order.len()
    }

    /// 启动定期裁剪任务
    pub fn start_trim_task(&self, interval: Duration) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                bridge.trim_recent();
            }
        })
    }
}

/// 提醒预览文案：分享项 > 文本内容 > 兜底
pub fn preview_text(message: &Message) -> String {
    if let Some(item) = &message.shared_item {
        return format!("Shared a {}", item.kind());
    }
    match &message.content {
        Some(content) if !content.is_empty() => content.clone(),
        _ => "Sent a message".to_string(),
    }
}
