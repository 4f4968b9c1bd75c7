//! Routed messaging: the node-side agent, the host-side proxy, and the
//! header wrap/unwrap rules they share

pub mod agent;
pub mod messages;
pub mod proxy;

pub use agent::RoutingAgent;
pub use messages::RoutingAgentMessage;
pub use proxy::RoutingAgentProxy;
