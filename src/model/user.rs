use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 用户展示资料（由账号系统拥有，聊天核心只读取用于富化会话/消息）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub display_name: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: Uuid, display_name: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            username: username.into(),
            avatar_url: None,
        }
    }

    /// 资料行缺失时的兜底占位（列表读取不因单行缺失而整体失败）
    pub fn unknown(user_id: Uuid) -> Self {
        Self {
            user_id,
            display_name: "Unknown user".to_string(),
            username: String::new(),
            avatar_url: None,
        }
    }
}

/// 登录态（管理/测试流程枚举用户前检查）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub verified: bool,
}
