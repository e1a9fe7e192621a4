use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use moka::future::Cache;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::infra::change_hub::{ChangeEvent, ChangeHub, ChangeKind, ChangePayload};
use crate::infra::metrics;
use crate::model::{Message, UserOnlineStatus};
use crate::repository::ConversationRepository;

/// 消息事件回调
pub type MessageCallback = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;
/// 会话表变更回调（通用刷新，拉取时再按用户过滤）
pub type RefreshCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
/// 在线状态变更回调
pub type PresenceCallback = Arc<dyn Fn(UserOnlineStatus) -> BoxFuture<'static, ()> + Send + Sync>;

/// 会话参与者缓存 TTL
const PARTICIPANTS_CACHE_TTL_SECS: u64 = 60;
/// 会话参与者缓存容量
const PARTICIPANTS_CACHE_CAPACITY: u64 = 10_000;

struct ActiveSubscription {
    token: u64,
    task: JoinHandle<()>,
}

/// 实时订阅管理器
///
/// 把变更流中心的原始事件桥接为按会话/按用户的回调：
/// - 频道名由订阅目标确定性推导，同名频道重复订阅会先撤销旧订阅（防止重复投递）
/// - 所有订阅路径统一走有界超时握手，失败显式返回错误
/// - 用户级消息订阅无法在流上按"两列之一是参与者"过滤，
///   改为宽订阅 + 带缓存的会话归属点查后在客户端侧过滤
pub struct SubscriptionManager {
    hub: Arc<ChangeHub>,
    conversations: Arc<dyn ConversationRepository>,
    active: Arc<DashMap<String, ActiveSubscription>>,
    participants_cache: Cache<Uuid, (Uuid, Uuid)>,
    subscribe_timeout: Duration,
    token_seq: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(
        hub: Arc<ChangeHub>,
        conversations: Arc<dyn ConversationRepository>,
        subscribe_timeout: Duration,
    ) -> Self {
        let participants_cache = Cache::builder()
            .max_capacity(PARTICIPANTS_CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(PARTICIPANTS_CACHE_TTL_SECS))
            .build();

        Self {
            hub,
            conversations,
            active: Arc::new(DashMap::new()),
            participants_cache,
            subscribe_timeout,
            token_seq: AtomicU64::new(1),
        }
    }

    /// 订阅某会话的新消息（INSERT）
    pub async fn subscribe_to_messages(
        &self,
        conversation_id: Uuid,
        on_message: MessageCallback,
    ) -> Result<Subscription> {
        let channel = format!("messages:{}", conversation_id);
        let handler = Box::new(move |event: ChangeEvent| -> BoxFuture<'static, ()> {
            let on_message = Arc::clone(&on_message);
            Box::pin(async move {
                if event.kind != ChangeKind::Insert {
                    return;
                }
                if let ChangePayload::Message(message) = event.payload {
                    if message.conversation_id == conversation_id {
                        on_message(message).await;
                    }
                }
            })
        });
        self.open(channel, handler).await
    }

    /// 订阅某用户所有会话的新消息
    ///
    /// 宽订阅全部消息插入事件，每条事件先查（带缓存的）会话参与者，
    /// 只把该用户参与的会话的消息交给回调。
    pub async fn subscribe_to_user_messages(
        &self,
        user_id: Uuid,
        on_message: MessageCallback,
    ) -> Result<Subscription> {
        let channel = format!("user-messages:{}", user_id);
        let cache = self.participants_cache.clone();
        let repo = Arc::clone(&self.conversations);

        let handler = Box::new(move |event: ChangeEvent| -> BoxFuture<'static, ()> {
            let on_message = Arc::clone(&on_message);
            let cache = cache.clone();
            let repo = Arc::clone(&repo);
            Box::pin(async move {
                if event.kind != ChangeKind::Insert {
                    return;
                }
                let message = match event.payload {
                    ChangePayload::Message(m) => m,
                    _ => return,
                };
                match lookup_participants(&cache, &repo, message.conversation_id).await {
                    Ok(Some((a, b))) if a == user_id || b == user_id => {
                        on_message(message).await;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("⚠️ 会话归属查询失败: {}", e),
                }
            })
        });
        self.open(channel, handler).await
    }

    /// 订阅会话表的全部变更（insert/update/delete），触发通用刷新回调
    pub async fn subscribe_to_conversations(
        &self,
        user_id: Uuid,
        on_update: RefreshCallback,
    ) -> Result<Subscription> {
        let channel = format!("conversations:{}", user_id);
        let handler = Box::new(move |event: ChangeEvent| -> BoxFuture<'static, ()> {
            let on_update = Arc::clone(&on_update);
            Box::pin(async move {
                if matches!(event.payload, ChangePayload::Conversation(_)) {
                    on_update().await;
                }
            })
        });
        self.open(channel, handler).await
    }

    /// 订阅某用户在线状态列的更新
    pub async fn subscribe_to_user_status(
        &self,
        user_id: Uuid,
        on_status: PresenceCallback,
    ) -> Result<Subscription> {
        let channel = format!("presence:{}", user_id);
        let handler = Box::new(move |event: ChangeEvent| -> BoxFuture<'static, ()> {
            let on_status = Arc::clone(&on_status);
            Box::pin(async move {
                if event.kind != ChangeKind::Update {
                    return;
                }
                if let ChangePayload::Presence(status) = event.payload {
                    if status.user_id == user_id {
                        on_status(status).await;
                    }
                }
            })
        });
        self.open(channel, handler).await
    }

    /// 当前活跃订阅数
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// 打开一路订阅：有界超时握手，同名频道先撤销旧任务
    async fn open(
        &self,
        channel: String,
        mut handler: Box<dyn FnMut(ChangeEvent) -> BoxFuture<'static, ()> + Send>,
    ) -> Result<Subscription> {
        let mut sub = self.hub.subscribe(&channel);
        sub.wait_subscribed(self.subscribe_timeout).await?;

        if let Some((_, prev)) = self.active.remove(&channel) {
            warn!("⚠️ 频道 {} 已有订阅，先撤销旧任务", channel);
            prev.task.abort();
        }

        let token = self.token_seq.fetch_add(1, Ordering::Relaxed);
        let task_channel = channel.clone();
        let task = tokio::spawn(async move {
            loop {
                match sub.events.recv().await {
                    Ok(event) => handler(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("⚠️ 频道 {} 落后 {} 条事件", task_channel, n);
                        metrics::record_stream_lagged(n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.active.insert(
            channel.clone(),
            ActiveSubscription { token, task },
        );
        debug!("✅ 订阅已建立: {}", channel);

        Ok(Subscription {
            channel,
            token,
            active: Arc::clone(&self.active),
        })
    }
}

/// 带缓存的会话参与者点查；会话不存在时返回 None
async fn lookup_participants(
    cache: &Cache<Uuid, (Uuid, Uuid)>,
    repo: &Arc<dyn ConversationRepository>,
    conversation_id: Uuid,
) -> Result<Option<(Uuid, Uuid)>> {
    let repo = Arc::clone(repo);
    let lookup = cache.try_get_with(conversation_id, async move {
        match repo.find_by_id(conversation_id).await? {
            Some(c) => Ok((c.participant_a, c.participant_b)),
            None => Err(ChatError::ConversationNotFound(conversation_id.to_string())),
        }
    });

    match lookup.await {
        Ok(pair) => Ok(Some(pair)),
        Err(err) => match err.as_ref() {
            ChatError::ConversationNotFound(_) => Ok(None),
            other => Err(other.clone()),
        },
    }
}

/// 订阅句柄
///
/// 调用方负责在卸载/切换会话时取消订阅；句柄被同名新订阅替换后
/// 取消操作不会误伤新任务。
pub struct Subscription {
    channel: String,
    token: u64,
    active: Arc<DashMap<String, ActiveSubscription>>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// 是否仍是该频道的当前订阅
    pub fn is_active(&self) -> bool {
        self.active
            .get(&self.channel)
            .map(|entry| entry.token == self.token)
            .unwrap_or(false)
    }

    /// 取消订阅并停止投递
    pub fn unsubscribe(self) {
        if let Some((_, sub)) = self
            .active
            .remove_if(&self.channel, |_, sub| sub.token == self.token)
        {
            sub.task.abort();
            debug!("🧹 已取消订阅: {}", self.channel);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("token", &self.token)
            .finish()
    }
}
