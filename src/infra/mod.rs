pub mod change_hub;
pub mod metrics;
pub mod presence_channel;
pub mod subscription_manager;

pub use change_hub::{ChangeEvent, ChangeHub, ChangeKind, ChangePayload, ChannelStatus, HandshakeMode};
pub use presence_channel::{PresenceChannelRegistry, PresenceChannelStats};
pub use subscription_manager::{
    MessageCallback, PresenceCallback, RefreshCallback, Subscription, SubscriptionManager,
};
