use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::message::Message;
use crate::model::user::UserProfile;

/// 会话状态
///
/// - Pending: 消息请求，等待对方接受/拒绝
/// - Active: 正常会话
/// - Declined: 已拒绝（终态，本设计不提供恢复操作）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Pending,
    Active,
    Declined,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Pending => "pending",
            ConversationStatus::Active => "active",
            ConversationStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ConversationStatus::Pending),
            "active" => Some(ConversationStatus::Active),
            "declined" => Some(ConversationStatus::Declined),
            _ => None,
        }
    }
}

/// 1:1 会话模型
///
/// 参与者按规范序持久化（participant_a < participant_b），
/// 保证同一对用户只存在一行会话。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub status: ConversationStatus,
    pub initiator_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// 接受时间（pending 期间为空）
    pub accepted_at: Option<DateTime<Utc>>,
    /// 最近一条消息时间，会话列表按它降序排序
    pub last_message_at: DateTime<Utc>,
}

impl Conversation {
    /// 把无序用户对归一化为规范序（按 UUID 字节序，即十六进制字符串的字典序）
    pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
        if a <= b { (a, b) } else { (b, a) }
    }

    /// 创建新会话
    ///
    /// 好友之间首次联系直接进入 Active 并填 accepted_at，否则为 Pending。
    pub fn new(initiator_id: Uuid, other_user_id: Uuid, is_friend: bool) -> Self {
        let (participant_a, participant_b) = Self::canonical_pair(initiator_id, other_user_id);
        let now = Utc::now();
        let (status, accepted_at) = if is_friend {
            (ConversationStatus::Active, Some(now))
        } else {
            (ConversationStatus::Pending, None)
        };

        Self {
            conversation_id: Uuid::new_v4(),
            participant_a,
            participant_b,
            status,
            initiator_id,
            created_at: now,
            accepted_at,
            last_message_at: now,
        }
    }

    /// 是否为参与者
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// 取对方参与者；user_id 不在会话内时返回 None
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.participant_a == user_id {
            Some(self.participant_b)
        } else if self.participant_b == user_id {
            Some(self.participant_a)
        } else {
            None
        }
    }
}

/// 读取时组装的会话视图（不落库）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    /// 非请求方参与者的资料
    pub other_user: UserProfile,
    pub last_message: Option<Message>,
    /// 对方发来且 read_at 为空的消息数；pending 请求固定为 0
    pub unread_count: u64,
}
