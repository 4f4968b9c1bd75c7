//! Configuration supplied by the embedding process
//!
//! The core recognizes exactly two knobs: the application name scoping
//! host-id lookups, and the set of fabric services whose published endpoint
//! is a JSON endpoint document rather than the canonical text form. Fabric
//! services with reserved partition ids are recognized by id; the gateway
//! resource manager has a dynamically-assigned partition id and is recognized
//! by service name.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain_types::{PartitionId, ServiceName};

/// Reserved partition ids of the fabric services that publish JSON endpoint
/// documents
pub mod reserved {
    use super::{PartitionId, Uuid};

    /// Backup/restore service partition id
    #[must_use]
    pub fn backup_restore_service() -> PartitionId {
        PartitionId::new(Uuid::from_u128(0x4000_0001))
    }

    /// Fault analysis service partition id
    #[must_use]
    pub fn fault_analysis_service() -> PartitionId {
        PartitionId::new(Uuid::from_u128(0x4000_0002))
    }

    /// Upgrade orchestration service partition id
    #[must_use]
    pub fn upgrade_orchestration_service() -> PartitionId {
        PartitionId::new(Uuid::from_u128(0x4000_0003))
    }

    /// Event store service partition id
    #[must_use]
    pub fn event_store_service() -> PartitionId {
        PartitionId::new(Uuid::from_u128(0x4000_0004))
    }
}

/// Environment-like options for the routing and resolution core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Application name scoping host-id lookups for system services
    pub system_service_application_name: String,

    /// Name of the dynamically-id'd resource manager service whose endpoint
    /// is a JSON endpoint document
    pub gateway_resource_manager_name: String,
}

impl FabricConfig {
    /// Whether `cuid` belongs to a reserved-id fabric service, i.e. its
    /// published endpoint is a JSON endpoint document
    #[must_use]
    pub fn is_reserved_fabric_service(&self, cuid: PartitionId) -> bool {
        cuid == reserved::backup_restore_service()
            || cuid == reserved::fault_analysis_service()
            || cuid == reserved::upgrade_orchestration_service()
            || cuid == reserved::event_store_service()
    }

    /// Whether `cuid` is the event store service, which publishes only an
    /// http endpoint
    #[must_use]
    pub fn is_event_store_service(&self, cuid: PartitionId) -> bool {
        cuid == reserved::event_store_service()
    }

    /// Whether `service_name` names the dynamically-id'd fabric service
    /// (matched case-insensitively)
    #[must_use]
    pub fn is_dynamic_id_fabric_service(&self, service_name: &ServiceName) -> bool {
        service_name
            .as_ref()
            .eq_ignore_ascii_case(&self.gateway_resource_manager_name)
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            system_service_application_name: "fabric:/System".to_string(),
            gateway_resource_manager_name: "fabric:/System/GatewayResourceManager".to_string(),
        }
    }
}
