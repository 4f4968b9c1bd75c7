//! # Switchboard
//!
//! Replica-addressed routing, resolution, and direct messaging for clustered
//! system services.
//!
//! Clients and co-located service hosts must reach a specific replica of a
//! specific partition of a named system service, never merely "some node".
//! This crate provides the pieces that implement that guarantee:
//!
//! - [`ServiceLocation`](location::ServiceLocation): the canonical identity
//!   of one live replica, parsed and serialized on the wire
//! - [`SystemServiceResolver`](resolver::SystemServiceResolver): service name
//!   → partition → current replica endpoints, with a versioned cache, stale
//!   marking, and targeted retry classification
//! - [`RoutingAgent`](routing::RoutingAgent) /
//!   [`RoutingAgentProxy`](routing::RoutingAgentProxy): the node-side and
//!   host-side pair moving request/reply traffic across federation, gateway,
//!   and local IPC while rewriting headers so the right replica handler
//!   receives the right message
//! - [`DirectMessagingAgent`](direct::DirectMessagingAgent) /
//!   [`DirectMessagingClient`](direct::DirectMessagingClient): the pair that
//!   bypasses routing once an endpoint is known, still preserving
//!   partition/replica filtering
//!
//! The federation overlay, IPC channel, TCP transport, hosting subsystem,
//! naming gateway, query engine, and failover manager stay outside: the crate
//! consumes them through the traits in [`transport`] and [`resolver`], and
//! holds no persistent state — everything cached is re-derivable.

#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod config;
pub mod direct;
pub mod domain_types;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod location;
pub mod message;
pub mod resolver;
pub mod routing;
pub mod transport;
pub mod utils;

pub use config::FabricConfig;
pub use direct::{DirectMessagingAgent, DirectMessagingClient, DirectMessagingMessage};
pub use domain_types::{
    ActivityId, HostId, MessageId, NodeInstance, PartitionId, ReplicaId, ReplicaInstance,
    ServiceName, ServiceTypeId, VersionedServiceTypeId,
};
pub use error::FabricError;
pub use filter::{HandlerTable, MessageFilter};
pub use lifecycle::{Component, Lifecycle, LifecycleState};
pub use location::ServiceLocation;
pub use message::{Actor, FilterHeader, Message, MessageBuilder, actions};
pub use resolver::SystemServiceResolver;
pub use routing::{RoutingAgent, RoutingAgentMessage, RoutingAgentProxy};
