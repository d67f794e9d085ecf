pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{ConnectHandler, NotifyHandler, PubSubClient, PubSubClientConfig, PubSubClientHandle};
pub use error::TransportError;
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{ClientRegistry, PubSubAppState, WsQuery, ws_handler};
