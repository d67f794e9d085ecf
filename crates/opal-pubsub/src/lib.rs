pub mod broadcaster;
pub mod error;
pub mod notifier;

pub use broadcaster::{Broadcaster, OnDisconnect, RedisFanoutConfig};
pub use error::PubSubError;
pub use notifier::{ChannelRestriction, Notification, Notifier, NotifierEvent};
