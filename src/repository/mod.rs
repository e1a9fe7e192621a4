pub mod conversation_repo;
pub mod memory;
pub mod message_repo;
pub mod presence_repo;
pub mod user_repo;

pub use conversation_repo::{ConversationRepository, PgConversationRepository};
pub use memory::{
    MemoryConversationRepository, MemoryMessageRepository, MemoryPresenceRepository,
    MemoryUserRepository,
};
pub use message_repo::{MessageRepository, PgMessageRepository};
pub use presence_repo::{PgPresenceRepository, PresenceRepository};
pub use user_repo::{PgUserRepository, UserRepository};
