//! Error types for routing, resolution, and direct messaging
//!
//! [`FabricError`] is deliberately serializable and cloneable: failure paths
//! reply with a typed body (`IpcFailure`, `DirectMessagingFailure`) carrying
//! the error across the wire, so the error itself is part of the wire format.
//! Gateway retry behavior is keyed off specific variants
//! (`SystemServiceNotFound`, `FmFailoverUnitNotFound`,
//! `MessageHandlerDoesNotExist`); the mapping from underlying causes to those
//! variants happens in the resolver and the routing agent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Crate-wide error type
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FabricError {
    /// A required header is missing or the action is unknown
    #[error("invalid message: missing required header or unknown action")]
    InvalidMessage,

    /// A service location host address contains the reserved `+` delimiter
    #[error("host address cannot contain '+': address='{address}'")]
    InvalidAddress {
        /// The offending address
        address: String,
    },

    /// The resolver found no partition or no parseable primary location;
    /// retryable at the gateway
    #[error("system service not found")]
    SystemServiceNotFound,

    /// The partition's failover unit vanished; the cached name mapping has
    /// been cleared and the caller should re-resolve
    #[error("failover unit not found")]
    FmFailoverUnitNotFound,

    /// The partition is unknown to the failover manager
    #[error("partition not found")]
    PartitionNotFound,

    /// The service exists but is currently offline
    #[error("service offline")]
    ServiceOffline,

    /// No registered handler matched the message's filter; retryable after
    /// re-resolution
    #[error("message handler does not exist")]
    MessageHandlerDoesNotExist,

    /// A leg of the request exceeded its remaining timeout budget
    #[error("operation timed out")]
    OperationTimeout,

    /// The underlying transport refused the connection
    #[error("connection denied")]
    ConnectionDenied,

    /// The IPC peer process is gone; mapped to
    /// [`FabricError::MessageHandlerDoesNotExist`] on the routed path
    #[error("cannot connect to anonymous target")]
    CannotConnectToAnonymousTarget,

    /// A failure without a more specific classification
    #[error("operation failed: {reason}")]
    OperationFailed {
        /// Human-readable cause
        reason: String,
    },

    /// A typed message body could not be encoded or decoded
    #[error("body serialization failed: {reason}")]
    Serialization {
        /// Serializer diagnostic
        reason: String,
    },

    /// An operation was attempted outside the open lifecycle state
    #[error("operation attempted while {state}")]
    InvalidState {
        /// The state the component was actually in
        state: LifecycleState,
    },
}

impl FabricError {
    /// Wraps a serde diagnostic
    #[must_use]
    pub fn serialization(err: &serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }

    /// Wraps an unclassified failure
    pub fn operation_failed(reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            reason: reason.into(),
        }
    }
}
