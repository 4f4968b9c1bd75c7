//! Caller-side direct messaging client
//!
//! Resolves a service name to its primary replica and hands back a reusable
//! send target for the replica's host address. While the partition is stable
//! the cached target is reused, skipping the per-call handshake; when the
//! partition vanishes the cached target is dropped so no further sends hit
//! the stale host.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::info;

use crate::domain_types::{ActivityId, ServiceName};
use crate::error::FabricError;
use crate::location::ServiceLocation;
use crate::resolver::SystemServiceResolver;
use crate::transport::{DatagramTransport, SendTarget};

/// Resolved direct destination: the primary replica's location and the
/// transport target to reach it
#[derive(Clone)]
pub struct ResolvedDirectTarget {
    /// The primary replica's location
    pub primary_location: ServiceLocation,
    /// Reusable transport target for the replica's host address
    pub primary_target: Arc<dyn SendTarget>,
}

impl std::fmt::Debug for ResolvedDirectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedDirectTarget")
            .field("primary_location", &self.primary_location)
            .field("primary_target", &self.primary_target.address())
            .finish()
    }
}

/// Resolves names to send targets and reuses them across calls. Cheaply
/// clonable; clones share the target cache.
#[derive(Clone)]
pub struct DirectMessagingClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn DatagramTransport>,
    resolver: Arc<SystemServiceResolver>,
    targets_by_name: RwLock<HashMap<ServiceName, Arc<dyn SendTarget>>>,
}

impl DirectMessagingClient {
    /// Creates a client over the transport and resolver
    #[must_use]
    pub fn new(
        transport: Arc<dyn DatagramTransport>,
        resolver: Arc<SystemServiceResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                resolver,
                targets_by_name: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Resolves `service_name` to its primary replica and a send target for
    /// that replica's host address.
    ///
    /// On [`FabricError::FmFailoverUnitNotFound`] the cached target for the
    /// name is dropped before the error is surfaced.
    pub async fn resolve(
        &self,
        service_name: &ServiceName,
        activity_id: ActivityId,
        timeout: Duration,
    ) -> Result<ResolvedDirectTarget, FabricError> {
        let resolved = match self
            .inner
            .resolver
            .resolve_by_name(service_name, activity_id, timeout)
            .await
        {
            Ok(resolved) => resolved,
            Err(error) => {
                if error == FabricError::FmFailoverUnitNotFound {
                    self.inner.clear_transport_target(service_name);
                }
                return Err(error);
            }
        };

        let primary_location = resolved.primary_location;

        let Some(primary_target) = self
            .inner
            .update_and_get_transport_target(service_name, primary_location.host_address())
        else {
            info!(
                activity = %activity_id,
                address = %primary_location.host_address(),
                "failed to resolve send target"
            );
            return Err(FabricError::SystemServiceNotFound);
        };

        Ok(ResolvedDirectTarget {
            primary_location,
            primary_target,
        })
    }
}

impl ClientInner {
    /// Double-checked reinsert: a read-locked hit reuses the cached target
    /// when its address still matches; otherwise the write path rechecks and
    /// creates a fresh target through the transport.
    fn update_and_get_transport_target(
        &self,
        service_name: &ServiceName,
        host_address: &str,
    ) -> Option<Arc<dyn SendTarget>> {
        {
            let targets = self
                .targets_by_name
                .read()
                .expect("target cache lock poisoned");

            if let Some(target) = targets.get(service_name) {
                if target.address() == host_address {
                    return Some(Arc::clone(target));
                }
            }
        }

        let mut targets = self
            .targets_by_name
            .write()
            .expect("target cache lock poisoned");

        if let Some(target) = targets.get(service_name) {
            if target.address() == host_address {
                return Some(Arc::clone(target));
            }
        }

        let target = self.transport.resolve_target(host_address)?;
        targets.insert(service_name.clone(), Arc::clone(&target));

        Some(target)
    }

    fn clear_transport_target(&self, service_name: &ServiceName) {
        let mut targets = self
            .targets_by_name
            .write()
            .expect("target cache lock poisoned");
        targets.remove(service_name);
    }
}
