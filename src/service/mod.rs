pub mod conversation_service;
pub mod notification_service;
pub mod presence_service;
pub mod user_service;

pub use conversation_service::ConversationService;
pub use notification_service::{AlertCallback, ChatAlert, NotificationBridge};
pub use presence_service::{format_last_seen, PresenceService};
pub use user_service::UserService;
