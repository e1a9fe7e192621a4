use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::infra::metrics;
use crate::model::PresenceSession;

/// 在线频道成员表（进程生命周期内的易失状态）
///
/// 按用户维护 (session_id -> PresenceSession) 的成员集合；
/// 一个用户只要有任意一个活跃成员就视为"频道在线"。
/// 持久化的 is_online 标志以数据库为准，这里只承载实时成员视图。
pub struct PresenceChannelRegistry {
    members: DashMap<Uuid, HashMap<Uuid, PresenceSession>>,
}

/// 成员表统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceChannelStats {
    /// 有活跃成员的用户数
    pub tracked_users: usize,
    /// 活跃会话总数
    pub total_sessions: usize,
}

impl PresenceChannelRegistry {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
        }
    }

    /// 登记一个会话成员
    pub fn track(&self, session: PresenceSession) {
        let user_id = session.user_id;
        self.members
            .entry(user_id)
            .or_insert_with(HashMap::new)
            .insert(session.session_id, session);

        debug!("🟢 presence track: user={}", user_id);
        metrics::record_live_sessions(self.total_sessions() as u64);
    }

    /// 注销一个会话成员；用户最后一个会话离开时移除整个条目
    pub fn untrack(&self, user_id: Uuid, session_id: Uuid) {
        if let Some(mut sessions) = self.members.get_mut(&user_id) {
            sessions.remove(&session_id);
            let empty = sessions.is_empty();
            drop(sessions);
            if empty {
                self.members.remove(&user_id);
            }
        }

        debug!("⚪ presence untrack: user={}", user_id);
        metrics::record_live_sessions(self.total_sessions() as u64);
    }

    /// 该用户当前是否有活跃频道成员
    pub fn is_user_live(&self, user_id: Uuid) -> bool {
        self.live_session_count(user_id) > 0
    }

    /// 该用户的活跃会话数
    pub fn live_session_count(&self, user_id: Uuid) -> usize {
        self.members
            .get(&user_id)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }

    /// 该用户的成员快照
    pub fn snapshot(&self, user_id: Uuid) -> Vec<PresenceSession> {
        self.members
            .get(&user_id)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    fn total_sessions(&self) -> usize {
        self.members.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn stats(&self) -> PresenceChannelStats {
        PresenceChannelStats {
            tracked_users: self.members.len(),
            total_sessions: self.total_sessions(),
        }
    }
}

impl Default for PresenceChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceInfo;

    fn session(user_id: Uuid) -> PresenceSession {
        PresenceSession::new(user_id, DeviceInfo::from_user_agent("test-agent"))
    }

    #[test]
    fn test_track_untrack() {
        let registry = PresenceChannelRegistry::new();
        let user = Uuid::new_v4();

        let s1 = session(user);
        let s2 = session(user);
        registry.track(s1.clone());
        registry.track(s2.clone());

        assert!(registry.is_user_live(user));
        assert_eq!(registry.live_session_count(user), 2);

        // 多设备：一个会话离开后仍在线
        registry.untrack(user, s1.session_id);
        assert!(registry.is_user_live(user));

        registry.untrack(user, s2.session_id);
        assert!(!registry.is_user_live(user));
        assert_eq!(registry.stats().tracked_users, 0);
    }

    #[test]
    fn test_untrack_unknown_is_noop() {
        let registry = PresenceChannelRegistry::new();
        registry.untrack(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(registry.stats().total_sessions, 0);
    }
}
