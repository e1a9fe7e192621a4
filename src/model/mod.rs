pub mod conversation;
pub mod message;
pub mod presence;
pub mod user;

pub use conversation::{Conversation, ConversationStatus, ConversationSummary};
pub use message::{Message, SharedItem};
pub use presence::{DeviceInfo, DeviceType, PresenceSession, UserOnlineStatus};
pub use user::{AuthSession, UserProfile};
