//! Strongly-typed identifiers shared across the crate
//!
//! These newtypes prevent primitive obsession on the identifiers that flow
//! through routing, resolution, and dispatch: partition ids, replica ids,
//! service names, host ids, and the per-request activity id used for trace
//! correlation.

use std::fmt;
use std::str::FromStr;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Partition identifier (the consistency unit id assigned by the failover
/// manager).
#[nutype(
    default = Uuid::nil(),
    derive(
        Debug,
        Clone,
        Copy,
        Default,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        Display,
        From,
        Into
    )
)]
pub struct PartitionId(Uuid);

impl PartitionId {
    /// Creates a new random partition ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// The nil partition ID, used where no partition is known yet
    #[must_use]
    pub fn nil() -> Self {
        Self::new(Uuid::nil())
    }
}

/// Replica identifier, stable across restarts of one replica slot.
///
/// The value `0` is reserved as the "match any replica" sentinel and never
/// appears in a published location.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ReplicaId(i64);

impl ReplicaId {
    /// The "match any replica" sentinel
    #[must_use]
    pub fn any_replica() -> Self {
        Self::new(0)
    }

    /// Whether this is the "match any replica" sentinel
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.into_inner() == 0
    }
}

/// Replica instance number; increases monotonically each time the replica
/// slot restarts.
///
/// The value `0` is reserved as the "match any instance" sentinel.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ReplicaInstance(i64);

impl ReplicaInstance {
    /// The "match any instance" sentinel
    #[must_use]
    pub fn any_instance() -> Self {
        Self::new(0)
    }

    /// Whether this is the "match any instance" sentinel
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.into_inner() == 0
    }
}

/// Fully-qualified system service name, e.g. `fabric:/System/FooSvc`
#[nutype(
    validate(len_char_min = 1, len_char_max = 1024),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ServiceName(String);

/// Service type identifier used to locate the host process running a service
#[nutype(
    validate(len_char_min = 1, len_char_max = 512),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ServiceTypeId(String);

/// Hosting-issued identifier of a service host process, used as the IPC
/// client id when the node agent forwards a routed request
#[nutype(
    validate(len_char_min = 1, len_char_max = 256),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct HostId(String);

/// Activity identifier correlating all traces for one logical request
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ActivityId(Uuid);

impl ActivityId {
    /// Creates a new random activity ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// The empty activity ID, used when a message arrived without one and no
    /// fresh id has been synthesized yet
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Uuid::nil())
    }
}

/// Unique identifier for a message, used to correlate replies
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// A live node: node name plus the instance number of its current incarnation.
///
/// The text form is `name:instance`, e.g. `nodeA:17`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInstance {
    /// Node name within the cluster
    pub node_name: String,
    /// Incarnation number; changes each time the node restarts
    pub instance_id: u64,
}

impl NodeInstance {
    /// Creates a node instance from a name and incarnation number
    pub fn new(node_name: impl Into<String>, instance_id: u64) -> Self {
        Self {
            node_name: node_name.into(),
            instance_id,
        }
    }
}

impl fmt::Display for NodeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_name, self.instance_id)
    }
}

impl FromStr for NodeInstance {
    type Err = NodeInstanceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Node names may themselves contain ':', so the instance number is
        // everything after the last separator.
        let (name, instance) = s
            .rsplit_once(':')
            .ok_or_else(|| NodeInstanceParseError(s.to_string()))?;

        if name.is_empty() {
            return Err(NodeInstanceParseError(s.to_string()));
        }

        let instance_id = instance
            .parse::<u64>()
            .map_err(|_| NodeInstanceParseError(s.to_string()))?;

        Ok(Self::new(name, instance_id))
    }
}

/// Error returned when a node instance string is malformed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not parse '{0}' as a node instance")]
pub struct NodeInstanceParseError(
    /// The unparseable input
    pub String,
);

/// A service type identifier together with its package version instance,
/// used for host-id lookup at the hosting subsystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedServiceTypeId {
    /// The service type being located
    pub type_id: ServiceTypeId,
    /// Service package version instance; `0` selects the active version
    pub version_instance: u64,
}

impl VersionedServiceTypeId {
    /// Pairs a service type with the active package version
    #[must_use]
    pub fn new(type_id: ServiceTypeId) -> Self {
        Self {
            type_id,
            version_instance: 0,
        }
    }
}
