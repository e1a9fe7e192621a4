//! 在线状态跟踪器 - 单个客户端会话的 start/stop 生命周期
//!
//! 每个进程/标签页持有一个实例，显式 start/stop，取代模块级全局量。
//! 职责：加入在线频道、首次活跃写入、周期心跳，以及聚焦/可见/卸载钩子。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{DeviceInfo, PresenceSession};
use crate::service::PresenceService;

struct TrackingState {
    session: PresenceSession,
    heartbeat: JoinHandle<()>,
}

/// 在线状态跟踪器
pub struct PresenceTracker {
    service: Arc<PresenceService>,
    heartbeat_interval: Duration,
    state: Mutex<Option<TrackingState>>,
}

impl PresenceTracker {
    pub fn new(service: Arc<PresenceService>, heartbeat_interval: Duration) -> Self {
        Self {
            service,
            heartbeat_interval,
            state: Mutex::new(None),
        }
    }

    /// 开始跟踪（幂等：已在跟踪时告警并直接返回）
    ///
    /// 加入在线频道成员表，写一次初始活跃，然后起周期心跳任务。
    /// 心跳失败只记日志——在线信号是尽力而为的，不能拖垮外围功能。
    pub async fn start(&self, user_id: Uuid, user_agent: &str) {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("⚠️ 在线跟踪已在进行中，忽略重复 start: user={}", user_id);
            return;
        }

        let session = PresenceSession::new(user_id, DeviceInfo::from_user_agent(user_agent));
        info!(
            "🟢 开始在线跟踪: user={}, session={}, device={:?}",
            user_id, session.session_id, session.device_info.device_type
        );

        self.service.registry().track(session.clone());

        if let Err(e) = self.service.update_user_activity(&session).await {
            warn!("⚠️ 初始活跃写入失败: {}", e);
        }

        let heartbeat = {
            let service = Arc::clone(&self.service);
            let session = session.clone();
            let interval = self.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // 初始写入已完成，跳过立即触发的第一拍
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = service.update_user_activity(&session).await {
                        warn!("⚠️ 心跳写入失败: {}", e);
                    }
                }
            })
        };

        *state = Some(TrackingState { session, heartbeat });
    }

    /// 重新标记活跃（窗口聚焦时调用）
    pub async fn handle_focus(&self) {
        self.record_activity().await;
    }

    /// 标签页可见性变化：变为可见时标记活跃，隐藏时不做任何事
    /// （失焦/隐藏有意不掉线，只有显式 stop 或页面卸载才下线）
    pub async fn handle_visibility(&self, visible: bool) {
        if visible {
            self.record_activity().await;
        }
    }

    /// 写一次活跃（失败只记日志）
    pub async fn record_activity(&self) {
        let state = self.state.lock().await;
        if let Some(state) = state.as_ref() {
            if let Err(e) = self.service.update_user_activity(&state.session).await {
                warn!("⚠️ 活跃写入失败: {}", e);
            }
        }
    }

    /// 页面卸载：标记离线并停止跟踪
    pub async fn handle_unload(&self) {
        let taken = self.state.lock().await.take();
        if let Some(state) = taken {
            state.heartbeat.abort();
            self.service
                .registry()
                .untrack(state.session.user_id, state.session.session_id);
            if let Err(e) = self
                .service
                .mark_user_offline(state.session.user_id, state.session.session_id)
                .await
            {
                warn!("⚠️ 离线标记失败: {}", e);
            }
            info!("⚪ 在线跟踪已随页面卸载停止: user={}", state.session.user_id);
        }
    }

    /// 停止跟踪：清心跳、退出频道、清会话 ID；未在跟踪时安全无操作
    ///
    /// 不写离线标记，需要的话由调用方另行调 mark_user_offline。
    pub async fn stop(&self) {
        let taken = self.state.lock().await.take();
        if let Some(state) = taken {
            state.heartbeat.abort();
            self.service
                .registry()
                .untrack(state.session.user_id, state.session.session_id);
            debug!("🛑 在线跟踪已停止: user={}", state.session.user_id);
        }
    }

    /// 是否正在跟踪
    pub async fn is_tracking(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// 当前会话 ID（未跟踪时为 None）
    pub async fn session_id(&self) -> Option<Uuid> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|state| state.session.session_id)
    }
}
