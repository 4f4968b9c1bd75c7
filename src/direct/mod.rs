//! Direct messaging: the transport path that bypasses routing once an
//! endpoint is known, while preserving partition/replica filtering

pub mod agent;
pub mod client;
pub mod messages;

pub use agent::DirectMessagingAgent;
pub use client::{DirectMessagingClient, ResolvedDirectTarget};
pub use messages::DirectMessagingMessage;
