pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod logging;
pub mod model;
pub mod repository;
pub mod service;
pub mod session;

pub use config::ChatConfig;
pub use error::{ChatError, Result};
pub use infra::{ChangeHub, PresenceChannelRegistry, Subscription, SubscriptionManager};
pub use model::*;
pub use service::{
    format_last_seen, ChatAlert, ConversationService, NotificationBridge, PresenceService,
    UserService,
};
pub use session::{ChatStore, PresenceTracker};
