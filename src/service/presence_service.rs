//! 在线状态服务 - 心跳写入、在线读取与过期清扫
//!
//! 在线信号是尽力而为的：is_online 反映最后一次心跳/track，
//! 不代表真实存活。没有优雅下线的客户端要靠过期清扫纠正。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::infra::change_hub::{ChangeEvent, ChangeHub};
use crate::infra::metrics;
use crate::infra::presence_channel::PresenceChannelRegistry;
use crate::infra::subscription_manager::{PresenceCallback, Subscription, SubscriptionManager};
use crate::model::{PresenceSession, UserOnlineStatus};
use crate::repository::PresenceRepository;

/// 在线状态服务
pub struct PresenceService {
    presence: Arc<dyn PresenceRepository>,
    registry: Arc<PresenceChannelRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    hub: Arc<ChangeHub>,
}

impl PresenceService {
    pub fn new(
        presence: Arc<dyn PresenceRepository>,
        registry: Arc<PresenceChannelRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        hub: Arc<ChangeHub>,
    ) -> Self {
        Self {
            presence,
            registry,
            subscriptions,
            hub,
        }
    }

    pub fn registry(&self) -> &Arc<PresenceChannelRegistry> {
        &self.registry
    }

    /// 写入一次会话活跃（心跳、窗口聚焦、标签页可见都走这里）
    ///
    /// 调用侧一律 fire-and-forget：失败记日志，不向上传播。
    pub async fn update_user_activity(&self, session: &PresenceSession) -> Result<()> {
        let now = Utc::now();
        self.presence.upsert_activity(session, now).await?;
        metrics::record_heartbeat();

        self.hub.publish(ChangeEvent::presence_update(UserOnlineStatus {
            user_id: session.user_id,
            is_online: true,
            last_activity_at: Some(now),
            last_seen: Some(now),
        }));
        debug!("💓 心跳已写入: user={}", session.user_id);
        Ok(())
    }

    /// 显式把当前会话标记下线（页面卸载、显式停止跟踪时调用）
    pub async fn mark_user_offline(&self, user_id: Uuid, session_id: Uuid) -> Result<()> {
        let now = Utc::now();
        let fully_offline = self.presence.mark_offline(user_id, session_id, now).await?;

        // 多设备场景：最后一个会话离开才广播离线
        if fully_offline {
            info!("⚪ 用户已离线: {}", user_id);
            self.hub.publish(ChangeEvent::presence_update(UserOnlineStatus {
                user_id,
                is_online: false,
                last_activity_at: None,
                last_seen: Some(now),
            }));
        }
        Ok(())
    }

    /// 读取持久化的在线状态（非订阅 UI 的读源）
    pub async fn get_user_online_status(&self, user_id: Uuid) -> Result<UserOnlineStatus> {
        Ok(self
            .presence
            .get_status(user_id)
            .await?
            .unwrap_or_else(|| UserOnlineStatus::offline(user_id)))
    }

    /// 批量读取在线状态（好友列表等场景）；无记录的用户补默认离线
    pub async fn get_batch_online_status(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, UserOnlineStatus>> {
        let mut statuses = self.presence.batch_get_status(user_ids).await?;
        for user_id in user_ids {
            statuses
                .entry(*user_id)
                .or_insert_with(|| UserOnlineStatus::offline(*user_id));
        }
        Ok(statuses)
    }

    /// 订阅某用户在线状态列的更新
    pub async fn subscribe_to_user_status(
        &self,
        user_id: Uuid,
        on_status: PresenceCallback,
    ) -> Result<Subscription> {
        self.subscriptions
            .subscribe_to_user_status(user_id, on_status)
            .await
    }

    /// 过期清扫：把心跳超出阈值的会话强制下线，返回下线的会话数
    ///
    /// 这是纠正"崩溃的标签页没发 beforeunload"的唯一机制，
    /// 必须由带外的定时任务周期执行，不能依赖客户端。
    pub async fn cleanup_stale_presence(&self, stale_after: Duration) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));

        let (swept, users_offline) = self.presence.sweep_stale(cutoff, now).await?;

        if swept > 0 {
            info!(
                "🧹 过期清扫: {} 个会话下线, {} 个用户转为离线",
                swept,
                users_offline.len()
            );
            metrics::record_stale_swept(swept);
        }

        for user_id in users_offline {
            self.hub.publish(ChangeEvent::presence_update(UserOnlineStatus {
                user_id,
                is_online: false,
                last_activity_at: None,
                last_seen: Some(now),
            }));
        }

        Ok(swept)
    }
}

/// 把最后在线时间映射为展示文案
///
/// 边界表：<60s -> "Active now"，<60m -> "{m}m ago"，
/// <24h -> "{h}h ago"，<7d -> "{d}d ago"，更早给日历日期。
pub fn format_last_seen(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(last_seen).num_seconds();

    if elapsed < 60 {
        "Active now".to_string()
    } else if elapsed < 60 * 60 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 24 * 60 * 60 {
        format!("{}h ago", elapsed / 3600)
    } else if elapsed < 7 * 24 * 60 * 60 {
        format!("{}d ago", elapsed / 86400)
    } else {
        last_seen.format("%b %d, %Y").to_string()
    }
}
