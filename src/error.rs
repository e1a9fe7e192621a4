use std::fmt;
use std::error::Error as StdError;
use serde::{Serialize, Deserialize};

/// 聊天核心错误类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatError {
    /// 内部错误
    Internal(String),
    /// 验证错误（调用方传入了缺失/非法的标识）
    Validation(String),
    /// 数据库错误（底层读写失败）
    Database(String),
    /// 用户未找到
    UserNotFound(String),
    /// 会话未找到
    ConversationNotFound(String),
    /// 消息未找到
    MessageNotFound(String),
    /// 实时订阅错误（握手失败）
    Subscription(String),
    /// 超时错误（订阅确认超时等）
    Timeout(String),
    /// 需要已验证的登录态（管理/测试流程枚举用户时检查）
    AuthenticationRequired(String),
    /// 序列化错误
    Serialization(String),
    /// 配置错误
    Configuration(String),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ChatError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ChatError::Database(msg) => write!(f, "Database error: {}", msg),
            ChatError::UserNotFound(id) => write!(f, "User not found: {}", id),
            ChatError::ConversationNotFound(id) => write!(f, "Conversation not found: {}", id),
            ChatError::MessageNotFound(id) => write!(f, "Message not found: {}", id),
            ChatError::Subscription(msg) => write!(f, "Subscription error: {}", msg),
            ChatError::Timeout(msg) => write!(f, "Timeout error: {}", msg),
            ChatError::AuthenticationRequired(msg) => write!(f, "Authentication required: {}", msg),
            ChatError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ChatError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl StdError for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::Database(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ChatError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ChatError::Timeout(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ChatError>;
