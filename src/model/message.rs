use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 消息内嵌的分享项
///
/// 按类型建模为带标签联合，每个变体只携带该类型真正用到的字段，
/// 序列化到 shared_item JSON 列时以 type 字段区分。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SharedItem {
    Restaurant {
        id: String,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        subtitle: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cuisine: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rating: Option<f32>,
    },
    Recipe {
        id: String,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        subtitle: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cook_time_minutes: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        servings: Option<u32>,
    },
    Video {
        id: String,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        subtitle: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
}

impl SharedItem {
    /// 类型名（用于通知预览文案等）
    pub fn kind(&self) -> &'static str {
        match self {
            SharedItem::Restaurant { .. } => "restaurant",
            SharedItem::Recipe { .. } => "recipe",
            SharedItem::Video { .. } => "video",
        }
    }

    pub fn title(&self) -> &str {
        match self {
            SharedItem::Restaurant { title, .. } => title,
            SharedItem::Recipe { title, .. } => title,
            SharedItem::Video { title, .. } => title,
        }
    }
}

/// 消息模型
///
/// 不变式：content 与 shared_item 至少有一个非空（分享可以带文字说明）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub shared_item: Option<SharedItem>,
    /// 批量标记已读时写入，其余情况不再更新
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// 创建文本消息
    pub fn new_text(conversation_id: Uuid, sender_id: Uuid, content: String) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: Some(content),
            shared_item: None,
            read_at: None,
            created_at: Utc::now(),
        }
    }

    /// 创建分享消息（可附带文字说明）
    pub fn new_share(
        conversation_id: Uuid,
        sender_id: Uuid,
        shared_item: SharedItem,
        caption: Option<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: caption,
            shared_item: Some(shared_item),
            read_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// 标记为已读
    pub fn mark_as_read(&mut self, at: DateTime<Utc>) {
        if self.read_at.is_none() {
            self.read_at = Some(at);
        }
    }
}
