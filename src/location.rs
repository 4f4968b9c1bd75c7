//! Service locations: the identity of one live replica
//!
//! A [`ServiceLocation`] names a running replica by node instance, partition,
//! replica id, replica instance, and the optional direct host address. The
//! canonical text form joins the five fields with `+`:
//!
//! ```text
//! nodeA:17+00000000-0000-0000-0000-0000000000ab+42+100+10.0.0.1:1234
//! ```
//!
//! `+` is reserved: a host address containing it cannot be published. A subset
//! of system services publish a JSON document of named endpoints instead of
//! the canonical form; [`ServiceLocation::parse_endpoint_list`] extracts the
//! first endpoint from such a document before tokenizing.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain_types::{NodeInstance, PartitionId, ReplicaId, ReplicaInstance};
use crate::error::FabricError;
use crate::message::FilterHeader;

const TOKEN_DELIMITER: char = '+';

/// Identity of one live replica of a system service partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLocation {
    node: NodeInstance,
    partition_id: PartitionId,
    replica_id: ReplicaId,
    replica_instance: ReplicaInstance,
    host_address: String,
}

impl Default for ServiceLocation {
    fn default() -> Self {
        Self {
            node: NodeInstance::default(),
            partition_id: PartitionId::nil(),
            replica_id: ReplicaId::new(0),
            replica_instance: ReplicaInstance::new(0),
            host_address: String::new(),
        }
    }
}

impl ServiceLocation {
    /// Creates a location, rejecting host addresses that contain the reserved
    /// `+` delimiter
    pub fn create(
        node: NodeInstance,
        partition_id: PartitionId,
        replica_id: ReplicaId,
        replica_instance: ReplicaInstance,
        host_address: impl Into<String>,
    ) -> Result<Self, FabricError> {
        let host_address = host_address.into();

        if host_address.contains(TOKEN_DELIMITER) {
            warn!(
                address = %host_address,
                "host address cannot contain '{TOKEN_DELIMITER}'"
            );
            return Err(FabricError::InvalidAddress {
                address: host_address,
            });
        }

        Ok(Self {
            node,
            partition_id,
            replica_id,
            replica_instance,
            host_address,
        })
    }

    /// Parses the canonical `+`-delimited text form.
    ///
    /// The host address token is optional; everything after the fourth
    /// delimiter belongs to it.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut tokens = text.splitn(5, TOKEN_DELIMITER);

        let node_token = tokens.next()?;
        let partition_token = tokens.next()?;
        let replica_id_token = tokens.next()?;
        let Some(replica_instance_token) = tokens.next() else {
            warn!(location = %text, "could not parse service location");
            return None;
        };

        let Ok(node) = node_token.parse::<NodeInstance>() else {
            warn!(token = %node_token, "could not parse node instance");
            return None;
        };

        let Ok(partition_uuid) = Uuid::parse_str(partition_token) else {
            warn!(token = %partition_token, "could not parse partition id");
            return None;
        };

        let Ok(replica_id) = replica_id_token.parse::<i64>() else {
            warn!(token = %replica_id_token, "could not parse replica id");
            return None;
        };

        let Ok(replica_instance) = replica_instance_token.parse::<i64>() else {
            warn!(token = %replica_instance_token, "could not parse replica instance");
            return None;
        };

        let host_address = tokens.next().unwrap_or_default().to_string();

        Some(Self {
            node,
            partition_id: PartitionId::new(partition_uuid),
            replica_id: ReplicaId::new(replica_id),
            replica_instance: ReplicaInstance::new(replica_instance),
            host_address,
        })
    }

    /// Parses the published form of services whose endpoint is a JSON
    /// document of named endpoints: the first endpoint value is extracted and
    /// then parsed canonically
    #[must_use]
    pub fn parse_endpoint_list(text: &str) -> Option<Self> {
        let endpoints = ExtractedEndpointList::from_str(text)?;
        let first = endpoints.first_endpoint()?;
        Self::parse(&first)
    }

    /// The node hosting the replica
    #[must_use]
    pub fn node(&self) -> &NodeInstance {
        &self.node
    }

    /// The replica's partition
    #[must_use]
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// The replica id
    #[must_use]
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// The replica instance
    #[must_use]
    pub fn replica_instance(&self) -> ReplicaInstance {
        self.replica_instance
    }

    /// The direct transport endpoint of the replica's host process; empty
    /// when the replica does not accept direct messages
    #[must_use]
    pub fn host_address(&self) -> &str {
        &self.host_address
    }

    /// Projects the dispatch filter for this location
    #[must_use]
    pub fn filter_header(&self) -> FilterHeader {
        FilterHeader::new(self.partition_id, self.replica_id, self.replica_instance)
    }

    /// Identity check tolerant of replica restarts and moves: compares only
    /// (partition, replica id)
    #[must_use]
    pub fn equals_ignoring_instances(&self, other: &Self) -> bool {
        self.partition_id == other.partition_id && self.replica_id == other.replica_id
    }
}

impl fmt::Display for ServiceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // NodeInstance is used for routing; partition/replica ids uniquely
        // identify the service instance.
        write!(
            f,
            "{}+{}+{}+{}+{}",
            self.node,
            self.partition_id,
            self.replica_id,
            self.replica_instance,
            self.host_address
        )
    }
}

/// The JSON endpoint document published by fabric services:
/// `{"Endpoints": {"name": "address", ...}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEndpointList {
    /// Named endpoints in document order
    #[serde(rename = "Endpoints")]
    endpoints: serde_json::Map<String, serde_json::Value>,
}

impl ExtractedEndpointList {
    /// Parses the serialized endpoint document
    #[must_use]
    pub fn from_str(serialized: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(serialized) {
            Ok(list) => Some(list),
            Err(error) => {
                warn!(%error, "could not parse endpoint list");
                None
            }
        }
    }

    /// The first endpoint value in document order, if any
    #[must_use]
    pub fn first_endpoint(&self) -> Option<String> {
        self.endpoints
            .values()
            .next()
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    }
}
