//! Replica filters and the handler table keyed by them
//!
//! Each host process registers its replica handlers under the replica's own
//! [`ServiceLocation`]; the [`MessageFilter`] derived from that location is
//! the dispatch key. Incoming routed and direct requests carry a
//! [`FilterHeader`] that the table matches against every registered filter.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::warn;

use crate::domain_types::{PartitionId, ReplicaId, ReplicaInstance};
use crate::location::ServiceLocation;
use crate::message::{FilterHeader, Message};

/// Predicate selecting messages for one registered replica.
///
/// Totally ordered on (partition, replica id, replica instance) so it can key
/// the handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageFilter {
    partition_id: PartitionId,
    replica_id: ReplicaId,
    replica_instance: ReplicaInstance,
}

impl MessageFilter {
    /// Whether this filter accepts a message carrying `header`.
    ///
    /// The partition must match exactly. Replica id and instance each match
    /// when equal, or when either side carries the `0` sentinel: a message
    /// addressed to the partition generically reaches whichever replica is
    /// registered, while a message addressed to a specific prior instance is
    /// rejected after the replica restarts.
    #[must_use]
    pub fn matches(&self, header: &FilterHeader) -> bool {
        if header.partition_id != self.partition_id {
            return false;
        }

        if !header.replica_id.is_any()
            && !self.replica_id.is_any()
            && header.replica_id != self.replica_id
        {
            return false;
        }

        if !header.replica_instance.is_any()
            && !self.replica_instance.is_any()
            && header.replica_instance != self.replica_instance
        {
            return false;
        }

        true
    }
}

impl From<&ServiceLocation> for MessageFilter {
    fn from(location: &ServiceLocation) -> Self {
        Self {
            partition_id: location.partition_id(),
            replica_id: location.replica_id(),
            replica_instance: location.replica_instance(),
        }
    }
}

impl From<&FilterHeader> for MessageFilter {
    fn from(header: &FilterHeader) -> Self {
        Self {
            partition_id: header.partition_id,
            replica_id: header.replica_id,
            replica_instance: header.replica_instance,
        }
    }
}

/// Location → handler map shared by the routing proxy and the direct
/// messaging agent.
///
/// Writers (register/unregister/clear) are rare; readers run on every message
/// dispatch. Registration replaces any previous handler for the same filter,
/// so a restarting replica cleanly supersedes its prior instance.
#[derive(Debug)]
pub struct HandlerTable<H> {
    handlers: RwLock<BTreeMap<MessageFilter, H>>,
}

impl<H: Clone> HandlerTable<H> {
    /// Creates an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers `handler` under `location`, replacing any existing handler
    pub fn set(&self, location: &ServiceLocation, handler: H) {
        let mut handlers = self.handlers.write().expect("handler table lock poisoned");
        handlers.insert(MessageFilter::from(location), handler);
    }

    /// Removes the handler registered under `location`, if any
    pub fn remove(&self, location: &ServiceLocation) {
        let mut handlers = self.handlers.write().expect("handler table lock poisoned");
        handlers.remove(&MessageFilter::from(location));
    }

    /// Drops every registration; invoked on close and abort
    pub fn clear(&self) {
        let mut handlers = self.handlers.write().expect("handler table lock poisoned");
        handlers.clear();
    }

    /// Number of registered handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().expect("handler table lock poisoned").len()
    }

    /// Whether the table has no registrations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the first handler whose filter matches the message's filter
    /// header. A message without a filter header matches nothing.
    ///
    /// Replica density per host is small, so a linear scan is fine here; a
    /// second-level index by partition id can be added if that changes.
    #[must_use]
    pub fn lookup(&self, message: &Message) -> Option<H> {
        let Some(header) = message.filter() else {
            warn!(
                message_id = ?message.message_id(),
                "message carries no filter header"
            );
            return None;
        };

        let handlers = self.handlers.read().expect("handler table lock poisoned");
        handlers
            .iter()
            .find(|(filter, _)| filter.matches(header))
            .map(|(_, handler)| handler.clone())
    }
}

impl<H: Clone> Default for HandlerTable<H> {
    fn default() -> Self {
        Self::new()
    }
}
