//! System service resolution: name → partition → primary replica location
//!
//! The resolver answers two questions. Given a service name, which partition
//! (cuid) backs it — answered once via a partition-list query and cached.
//! Given a cuid, where is the primary replica right now — answered through
//! the failover manager's resolver with a cached [`LocationVersion`] so an
//! unchanged topology costs nothing.
//!
//! The version cache replaces an entry only with a strictly greater version,
//! which makes concurrent resolves race-safe: whichever reply is newest wins
//! regardless of completion order. A stale hint set by
//! [`SystemServiceResolver::mark_stale_by_cuid`] forces exactly one
//! refreshing resolve; the superseding write resets it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::FabricConfig;
use crate::domain_types::{ActivityId, PartitionId, ServiceName};
use crate::error::FabricError;
use crate::location::ServiceLocation;
use crate::message::{Actor, Message};
use crate::utils::Deadline;

/// Query name issued to fetch the partition list of a service
pub const GET_SERVICE_PARTITION_LIST: &str = "GetServicePartitionList";

/// Wire action of query requests
pub const QUERY_REQUEST_ACTION: &str = "QueryRequest";

/// Partitioning scheme and range of one partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionInfo {
    /// The service has a single partition
    #[default]
    Singleton,
    /// The partition covers an inclusive signed 64-bit key range
    Int64Range {
        /// Low key, inclusive
        low: i64,
        /// High key, inclusive
        high: i64,
    },
    /// The partition is selected by name
    Named {
        /// Partition name
        name: String,
    },
}

/// Failover manager epoch; strictly increases on FM reconfiguration, and any
/// change invalidates cached versions
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GenerationNumber(
    /// The raw epoch counter
    pub u64,
);

/// Version of a cached partition location.
///
/// Ordered lexicographically on (fm version, generation, reserved); a cached
/// entry is only ever replaced by a strictly greater version.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LocationVersion {
    /// Failover manager lookup version
    pub fm_version: u64,
    /// Failover manager epoch the version belongs to
    pub generation: GenerationNumber,
    /// Reserved; always zero today
    pub reserved: u64,
}

impl LocationVersion {
    /// Creates a version within a generation
    #[must_use]
    pub fn new(fm_version: u64, generation: GenerationNumber) -> Self {
        Self {
            fm_version,
            generation,
            reserved: 0,
        }
    }
}

/// A partition plus the version the caller already holds, sent to the FM
/// resolver so it can answer "unchanged" cheaply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedCuid {
    /// The partition being resolved
    pub cuid: PartitionId,
    /// FM version the caller holds, or 0 for none
    pub fm_version: u64,
    /// Generation the held version belongs to
    pub generation: GenerationNumber,
}

/// Whether the FM resolver may answer from its own cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    /// Serve from cache when the version is current
    UseCached,
    /// Bypass the cache and fetch fresh endpoints
    Refresh,
}

/// Published endpoints of one partition's replica set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReplicaSet {
    /// Published primary endpoint, when a primary exists
    pub primary_location: Option<String>,
    /// Published secondary endpoints
    pub secondary_locations: Vec<String>,
}

/// One partition's entry in an FM resolve reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTableEntry {
    /// The partition this entry describes
    pub cuid: PartitionId,
    /// FM lookup version of this entry
    pub version: u64,
    /// The replica set endpoints
    pub replica_set: ServiceReplicaSet,
}

/// Successful FM resolve reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedServicePartitions {
    /// One entry per requested partition
    pub entries: Vec<ServiceTableEntry>,
    /// The FM generation the entries belong to
    pub generation: GenerationNumber,
}

/// Body of a partition-list query request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequestBody {
    /// Query name; [`GET_SERVICE_PARTITION_LIST`] here
    pub query_name: String,
    /// The service whose partitions are requested
    pub service_name: ServiceName,
}

/// One partition in a partition-list query reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePartitionQueryResult {
    /// The partition id
    pub partition_id: PartitionId,
    /// Partitioning scheme and range
    pub partition_info: PartitionInfo,
}

/// Body of a partition-list query reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePartitionListBody {
    /// The service's partitions
    pub partitions: Vec<ServicePartitionQueryResult>,
}

/// The query subsystem, used for the one-time name → cuid lookup
#[async_trait]
pub trait QueryGateway: Send + Sync {
    /// Processes a query request and returns the typed reply message
    async fn process_incoming_query(
        &self,
        message: Message,
        activity_id: ActivityId,
        timeout: Duration,
    ) -> Result<Message, FabricError>;
}

/// The failover manager's resolver, used for cuid → endpoints
#[async_trait]
pub trait PartitionResolver: Send + Sync {
    /// Resolves the current replica sets of `partitions`
    async fn resolve_service_partition(
        &self,
        partitions: Vec<VersionedCuid>,
        cache_mode: CacheMode,
        activity_id: ActivityId,
        timeout: Duration,
    ) -> Result<ResolvedServicePartitions, FabricError>;
}

/// Result of resolving a service name to its primary replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSystemServiceLocation {
    /// The primary replica's location
    pub primary_location: ServiceLocation,
    /// Published secondary endpoints, verbatim
    pub secondary_locations: Vec<String>,
}

/// Result of resolving a partition to its replica set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSystemServicePartition {
    /// The FM reply entries
    pub entries: Vec<ServiceTableEntry>,
    /// Partitioning info when known from a prior query, singleton otherwise
    pub partition_info: PartitionInfo,
    /// The FM generation of the entries
    pub generation: GenerationNumber,
}

#[derive(Debug, Clone)]
struct LocationVersionEntry {
    version: LocationVersion,
    is_stale: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    cuids_by_name: HashMap<ServiceName, (PartitionId, PartitionInfo)>,
    versions_by_cuid: HashMap<PartitionId, LocationVersionEntry>,
}

/// The name↔cuid and cuid→version caches, updated coherently under one lock
#[derive(Debug, Default)]
struct LocationCache {
    state: RwLock<CacheState>,
}

impl LocationCache {
    fn cached_cuid(&self, service_name: &ServiceName) -> Option<(PartitionId, PartitionInfo)> {
        let state = self.state.read().expect("location cache lock poisoned");
        state.cuids_by_name.get(service_name).cloned()
    }

    fn update_cached_cuid(
        &self,
        service_name: &ServiceName,
        cuid: PartitionId,
        partition_info: PartitionInfo,
    ) {
        let mut state = self.state.write().expect("location cache lock poisoned");
        state
            .cuids_by_name
            .insert(service_name.clone(), (cuid, partition_info));
    }

    /// Clears the name mapping and the corresponding version entry in one
    /// critical section
    fn clear_cached_cuid(&self, service_name: &ServiceName) {
        let mut state = self.state.write().expect("location cache lock poisoned");
        if let Some((cuid, _)) = state.cuids_by_name.remove(service_name) {
            state.versions_by_cuid.remove(&cuid);
        }
    }

    fn location_version(&self, cuid: PartitionId) -> (LocationVersion, bool) {
        let state = self.state.read().expect("location cache lock poisoned");
        state
            .versions_by_cuid
            .get(&cuid)
            .map_or((LocationVersion::default(), false), |entry| {
                (entry.version, entry.is_stale)
            })
    }

    /// Stores `version` only if strictly greater than the cached one; the
    /// re-read under the write lock guards against a concurrent newer write
    fn try_set_location_version(&self, cuid: PartitionId, version: LocationVersion) -> bool {
        let mut state = self.state.write().expect("location cache lock poisoned");

        let newer = state
            .versions_by_cuid
            .get(&cuid)
            .is_none_or(|entry| entry.version < version);

        if newer {
            state.versions_by_cuid.insert(
                cuid,
                LocationVersionEntry {
                    version,
                    is_stale: false,
                },
            );
        }

        newer
    }

    fn mark_stale_by_name(&self, service_name: &ServiceName) {
        let mut state = self.state.write().expect("location cache lock poisoned");

        let cuid = state
            .cuids_by_name
            .get(service_name)
            .map(|(cuid, _)| *cuid);

        if let Some(cuid) = cuid {
            if let Some(entry) = state.versions_by_cuid.get_mut(&cuid) {
                entry.is_stale = true;
            }
        }
    }

    fn mark_stale_by_cuid(&self, cuid: PartitionId) {
        let mut state = self.state.write().expect("location cache lock poisoned");
        if let Some(entry) = state.versions_by_cuid.get_mut(&cuid) {
            entry.is_stale = true;
        }
    }
}

/// Resolves system service names and partitions to replica endpoints, with a
/// versioned cache and targeted retry classification
pub struct SystemServiceResolver {
    query: Arc<dyn QueryGateway>,
    fm_resolver: Arc<dyn PartitionResolver>,
    config: FabricConfig,
    cache: LocationCache,
}

struct Resolution {
    primary_location: ServiceLocation,
    secondary_locations: Vec<String>,
    entries: Vec<ServiceTableEntry>,
    partition_info: PartitionInfo,
    generation: GenerationNumber,
}

impl SystemServiceResolver {
    /// Creates a resolver over the query and FM collaborators
    #[must_use]
    pub fn new(
        query: Arc<dyn QueryGateway>,
        fm_resolver: Arc<dyn PartitionResolver>,
        config: FabricConfig,
    ) -> Self {
        Self {
            query,
            fm_resolver,
            config,
            cache: LocationCache::default(),
        }
    }

    /// Resolves a service name to its primary replica location and the
    /// published secondary endpoints
    pub async fn resolve_by_name(
        &self,
        service_name: &ServiceName,
        activity_id: ActivityId,
        timeout: Duration,
    ) -> Result<ResolvedSystemServiceLocation, FabricError> {
        let deadline = Deadline::after(timeout);

        let (cuid, partition_info) = match self.cache.cached_cuid(service_name) {
            Some((cuid, partition_info)) => {
                debug!(
                    activity = %activity_id,
                    service = %service_name,
                    %cuid,
                    "using cached cuid"
                );
                (cuid, partition_info)
            }
            None => self.query_for_cuid(service_name, activity_id, deadline).await?,
        };

        let resolution = self
            .resolve_primary_location(Some(service_name), cuid, partition_info, activity_id, deadline)
            .await?;

        Ok(ResolvedSystemServiceLocation {
            primary_location: resolution.primary_location,
            secondary_locations: resolution.secondary_locations,
        })
    }

    /// Resolves a partition to its replica set entries
    pub async fn resolve_by_cuid(
        &self,
        cuid: PartitionId,
        activity_id: ActivityId,
        timeout: Duration,
    ) -> Result<ResolvedSystemServicePartition, FabricError> {
        let deadline = Deadline::after(timeout);

        let resolution = self
            .resolve_primary_location(None, cuid, PartitionInfo::default(), activity_id, deadline)
            .await?;

        Ok(ResolvedSystemServicePartition {
            entries: resolution.entries,
            partition_info: resolution.partition_info,
            generation: resolution.generation,
        })
    }

    /// Hints that the cached location of `service_name` is stale; the next
    /// resolve bypasses the FM cache once. Never fails.
    pub fn mark_stale_by_name(&self, service_name: &ServiceName) {
        self.cache.mark_stale_by_name(service_name);
    }

    /// Hints that the cached location of `cuid` is stale; the next resolve
    /// bypasses the FM cache once. Never fails.
    pub fn mark_stale_by_cuid(&self, cuid: PartitionId) {
        self.cache.mark_stale_by_cuid(cuid);
    }

    async fn query_for_cuid(
        &self,
        service_name: &ServiceName,
        activity_id: ActivityId,
        deadline: Deadline,
    ) -> Result<(PartitionId, PartitionInfo), FabricError> {
        let body = QueryRequestBody {
            query_name: GET_SERVICE_PARTITION_LIST.to_string(),
            service_name: service_name.clone(),
        };

        let request = Message::builder(Actor::NamingGateway, QUERY_REQUEST_ACTION)
            .activity_id(activity_id)
            .timeout(deadline.remaining())
            .typed_body(&body)?
            .build();

        let reply = self
            .query
            .process_incoming_query(request, activity_id, deadline.remaining())
            .await
            .inspect_err(|error| {
                warn!(activity = %activity_id, service = %service_name, %error, "query failed");
            })?;

        let result: ServicePartitionListBody = reply.body_as().inspect_err(|_| {
            warn!(activity = %activity_id, service = %service_name, "invalid query reply body");
        })?;

        let Some(first) = result.partitions.first() else {
            warn!(activity = %activity_id, service = %service_name, "no partitions found");
            return Err(FabricError::SystemServiceNotFound);
        };

        // System services are single-partitioned by contract; anything else
        // is logged and the first partition used.
        if result.partitions.len() > 1 {
            error!(
                activity = %activity_id,
                service = %service_name,
                count = result.partitions.len(),
                "unexpected partition count"
            );
        }

        let cuid = first.partition_id;
        let partition_info = first.partition_info.clone();
        self.cache
            .update_cached_cuid(service_name, cuid, partition_info.clone());

        info!(
            activity = %activity_id,
            service = %service_name,
            %cuid,
            "cached cuid mapping"
        );

        Ok((cuid, partition_info))
    }

    async fn resolve_primary_location(
        &self,
        service_name: Option<&ServiceName>,
        cuid: PartitionId,
        partition_info: PartitionInfo,
        activity_id: ActivityId,
        deadline: Deadline,
    ) -> Result<Resolution, FabricError> {
        let (version, is_stale) = self.cache.location_version(cuid);

        debug!(
            activity = %activity_id,
            service = ?service_name,
            %cuid,
            ?version,
            stale = is_stale,
            "resolving"
        );

        let request = vec![VersionedCuid {
            cuid,
            fm_version: version.fm_version,
            generation: version.generation,
        }];
        let cache_mode = if is_stale {
            CacheMode::Refresh
        } else {
            CacheMode::UseCached
        };

        let resolved = match self
            .fm_resolver
            .resolve_service_partition(request, cache_mode, activity_id, deadline.remaining())
            .await
        {
            Ok(resolved) => resolved,
            Err(error) => {
                return Err(self.classify_resolver_error(service_name, cuid, activity_id, error));
            }
        };

        let Some(first) = resolved.entries.first() else {
            warn!(activity = %activity_id, %cuid, "resolver returned no entries");
            return Err(FabricError::SystemServiceNotFound);
        };

        let mut primary_location = None;
        let mut secondary_locations = Vec::new();
        let http_only = self.config.is_event_store_service(cuid);

        if let Some(published) = &first.replica_set.primary_location {
            if http_only {
                // The parser expects a tcp endpoint; this service publishes
                // only http(s), so report success with an empty host.
                primary_location = Some(ServiceLocation::default());
            } else {
                let json_endpoints = self.config.is_reserved_fabric_service(cuid)
                    || service_name
                        .is_some_and(|name| self.config.is_dynamic_id_fabric_service(name));

                let parsed = if json_endpoints {
                    ServiceLocation::parse_endpoint_list(published)
                } else {
                    ServiceLocation::parse(published)
                };

                if let Some(location) = parsed {
                    secondary_locations = first.replica_set.secondary_locations.clone();

                    let location_version = LocationVersion::new(first.version, resolved.generation);
                    if self.cache.try_set_location_version(cuid, location_version) {
                        info!(
                            activity = %activity_id,
                            %cuid,
                            ?location_version,
                            "updated location version"
                        );
                    }

                    primary_location = Some(location);
                }
            }
        }

        let Some(primary_location) = primary_location else {
            // A present-but-unparseable location is retryable at the gateway.
            return Err(FabricError::SystemServiceNotFound);
        };

        Ok(Resolution {
            primary_location,
            secondary_locations,
            entries: resolved.entries,
            partition_info,
            generation: resolved.generation,
        })
    }

    fn classify_resolver_error(
        &self,
        service_name: Option<&ServiceName>,
        cuid: PartitionId,
        activity_id: ActivityId,
        error: FabricError,
    ) -> FabricError {
        info!(
            activity = %activity_id,
            service = ?service_name,
            %cuid,
            %error,
            "could not resolve"
        );

        // Most FM errors on system service resolution are not retryable;
        // these are converted to errors the gateway retries on.
        match error {
            FabricError::FmFailoverUnitNotFound | FabricError::PartitionNotFound => {
                if let Some(service_name) = service_name {
                    info!(
                        activity = %activity_id,
                        service = %service_name,
                        %cuid,
                        "clearing cuid mapping"
                    );
                    self.cache.clear_cached_cuid(service_name);
                }
                FabricError::FmFailoverUnitNotFound
            }
            FabricError::ServiceOffline => FabricError::SystemServiceNotFound,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::reserved;
    use crate::domain_types::{NodeInstance, ReplicaId, ReplicaInstance};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct FakeQuery {
        partitions: Vec<ServicePartitionQueryResult>,
        calls: AtomicUsize,
    }

    impl FakeQuery {
        fn returning(partitions: Vec<ServicePartitionQueryResult>) -> Arc<Self> {
            Arc::new(Self {
                partitions,
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryGateway for FakeQuery {
        async fn process_incoming_query(
            &self,
            message: Message,
            _activity_id: ActivityId,
            _timeout: Duration,
        ) -> Result<Message, FabricError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let body: QueryRequestBody = message.body_as()?;
            assert_eq!(body.query_name, GET_SERVICE_PARTITION_LIST);

            Ok(Message::builder(Actor::NamingGateway, "QueryReply")
                .typed_body(&ServicePartitionListBody {
                    partitions: self.partitions.clone(),
                })
                .unwrap()
                .build())
        }
    }

    struct FakeFmResolver {
        replies: Mutex<VecDeque<Result<ResolvedServicePartitions, FabricError>>>,
        calls: Mutex<Vec<(VersionedCuid, CacheMode)>>,
    }

    impl FakeFmResolver {
        fn scripted(
            replies: Vec<Result<ResolvedServicePartitions, FabricError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(VersionedCuid, CacheMode)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PartitionResolver for FakeFmResolver {
        async fn resolve_service_partition(
            &self,
            partitions: Vec<VersionedCuid>,
            cache_mode: CacheMode,
            _activity_id: ActivityId,
            _timeout: Duration,
        ) -> Result<ResolvedServicePartitions, FabricError> {
            assert_eq!(partitions.len(), 1);
            self.calls.lock().unwrap().push((partitions[0], cache_mode));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted resolve call")
        }
    }

    fn service_name() -> ServiceName {
        ServiceName::try_new("fabric:/System/FooSvc").unwrap()
    }

    fn cuid() -> PartitionId {
        PartitionId::new(Uuid::from_u128(0xAB))
    }

    fn published_location(partition: PartitionId) -> String {
        ServiceLocation::create(
            NodeInstance::new("nodeA", 17),
            partition,
            ReplicaId::new(42),
            ReplicaInstance::new(100),
            "10.0.0.1:1234",
        )
        .unwrap()
        .to_string()
    }

    fn fm_reply(partition: PartitionId, version: u64, generation: u64) -> ResolvedServicePartitions {
        fm_reply_with_location(partition, version, generation, published_location(partition))
    }

    fn fm_reply_with_location(
        partition: PartitionId,
        version: u64,
        generation: u64,
        location: String,
    ) -> ResolvedServicePartitions {
        ResolvedServicePartitions {
            entries: vec![ServiceTableEntry {
                cuid: partition,
                version,
                replica_set: ServiceReplicaSet {
                    primary_location: Some(location),
                    secondary_locations: vec!["nodeC:4+secondary".to_string()],
                },
            }],
            generation: GenerationNumber(generation),
        }
    }

    fn singleton_query_result(partition: PartitionId) -> Vec<ServicePartitionQueryResult> {
        vec![ServicePartitionQueryResult {
            partition_id: partition,
            partition_info: PartitionInfo::Singleton,
        }]
    }

    fn resolver(
        query: &Arc<FakeQuery>,
        fm: &Arc<FakeFmResolver>,
    ) -> SystemServiceResolver {
        SystemServiceResolver::new(query.clone(), fm.clone(), FabricConfig::default())
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_name_resolution_queries_once_then_hits_cache() {
        let query = FakeQuery::returning(singleton_query_result(cuid()));
        let fm = FakeFmResolver::scripted(vec![
            Ok(fm_reply(cuid(), 7, 3)),
            Ok(fm_reply(cuid(), 7, 3)),
        ]);
        let resolver = resolver(&query, &fm);

        let first = resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(first.primary_location.replica_id(), ReplicaId::new(42));
        assert_eq!(first.secondary_locations.len(), 1);

        // Second resolve: no partition query, one resolve carrying the
        // cached version with UseCached.
        resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(query.call_count(), 1);
        let calls = fm.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.fm_version, 0);
        assert_eq!(calls[0].1, CacheMode::UseCached);
        assert_eq!(calls[1].0.cuid, cuid());
        assert_eq!(calls[1].0.fm_version, 7);
        assert_eq!(calls[1].0.generation, GenerationNumber(3));
        assert_eq!(calls[1].1, CacheMode::UseCached);
    }

    #[tokio::test]
    async fn test_mark_stale_triggers_one_refresh() {
        let query = FakeQuery::returning(singleton_query_result(cuid()));
        let fm = FakeFmResolver::scripted(vec![
            Ok(fm_reply(cuid(), 7, 3)),
            Ok(fm_reply(cuid(), 9, 3)),
            Ok(fm_reply(cuid(), 9, 3)),
        ]);
        let resolver = resolver(&query, &fm);

        resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();

        resolver.mark_stale_by_cuid(cuid());

        resolver
            .resolve_by_cuid(cuid(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();

        // The superseding write reset the stale flag.
        resolver
            .resolve_by_cuid(cuid(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();

        let calls = fm.calls();
        assert_eq!(calls[1].1, CacheMode::Refresh);
        assert_eq!(calls[2].1, CacheMode::UseCached);
        assert_eq!(calls[2].0.fm_version, 9);
    }

    #[tokio::test]
    async fn test_mark_stale_by_name_reaches_version_entry() {
        let query = FakeQuery::returning(singleton_query_result(cuid()));
        let fm = FakeFmResolver::scripted(vec![
            Ok(fm_reply(cuid(), 7, 3)),
            Ok(fm_reply(cuid(), 8, 3)),
        ]);
        let resolver = resolver(&query, &fm);

        resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();

        resolver.mark_stale_by_name(&service_name());

        resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(fm.calls()[1].1, CacheMode::Refresh);
    }

    #[tokio::test]
    async fn test_version_only_moves_forward() {
        let query = FakeQuery::returning(singleton_query_result(cuid()));
        let fm = FakeFmResolver::scripted(vec![
            Ok(fm_reply(cuid(), 9, 3)),
            Ok(fm_reply(cuid(), 7, 3)),
            Ok(fm_reply(cuid(), 9, 3)),
        ]);
        let resolver = resolver(&query, &fm);

        for _ in 0..3 {
            resolver
                .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
                .await
                .unwrap();
        }

        // The out-of-order v7 reply must not regress the cached v9.
        let calls = fm.calls();
        assert_eq!(calls[1].0.fm_version, 9);
        assert_eq!(calls[2].0.fm_version, 9);
    }

    #[tokio::test]
    async fn test_topology_change_clears_name_mapping() {
        let query = FakeQuery::returning(singleton_query_result(cuid()));
        let fm = FakeFmResolver::scripted(vec![
            Ok(fm_reply(cuid(), 7, 3)),
            Err(FabricError::PartitionNotFound),
            Ok(fm_reply(cuid(), 8, 3)),
        ]);
        let resolver = resolver(&query, &fm);

        resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(query.call_count(), 1);

        let error = resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(error, FabricError::FmFailoverUnitNotFound);

        // The cleared mapping forces a fresh partition query, and the erased
        // version entry resets the resolve version to zero.
        resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(query.call_count(), 2);
        assert_eq!(fm.calls()[2].0.fm_version, 0);
    }

    #[tokio::test]
    async fn test_service_offline_maps_to_not_found() {
        let query = FakeQuery::returning(singleton_query_result(cuid()));
        let fm = FakeFmResolver::scripted(vec![Err(FabricError::ServiceOffline)]);
        let resolver = resolver(&query, &fm);

        let error = resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(error, FabricError::SystemServiceNotFound);
    }

    #[tokio::test]
    async fn test_other_resolver_errors_pass_through() {
        let query = FakeQuery::returning(singleton_query_result(cuid()));
        let fm = FakeFmResolver::scripted(vec![Err(FabricError::OperationTimeout)]);
        let resolver = resolver(&query, &fm);

        let error = resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(error, FabricError::OperationTimeout);
    }

    #[tokio::test]
    async fn test_empty_partition_list_is_not_found() {
        let query = FakeQuery::returning(vec![]);
        let fm = FakeFmResolver::scripted(vec![]);
        let resolver = resolver(&query, &fm);

        let error = resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(error, FabricError::SystemServiceNotFound);
        assert!(fm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_multiple_partitions_takes_first() {
        let second = PartitionId::new(Uuid::from_u128(0xCD));
        let query = FakeQuery::returning(vec![
            ServicePartitionQueryResult {
                partition_id: cuid(),
                partition_info: PartitionInfo::Singleton,
            },
            ServicePartitionQueryResult {
                partition_id: second,
                partition_info: PartitionInfo::Singleton,
            },
        ]);
        let fm = FakeFmResolver::scripted(vec![Ok(fm_reply(cuid(), 7, 3))]);
        let resolver = resolver(&query, &fm);

        resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(fm.calls()[0].0.cuid, cuid());
    }

    #[tokio::test]
    async fn test_unparseable_location_is_not_found() {
        let query = FakeQuery::returning(singleton_query_result(cuid()));
        let fm = FakeFmResolver::scripted(vec![Ok(fm_reply_with_location(
            cuid(),
            7,
            3,
            "definitely not a location".to_string(),
        ))]);
        let resolver = resolver(&query, &fm);

        let error = resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(error, FabricError::SystemServiceNotFound);
    }

    #[tokio::test]
    async fn test_missing_primary_is_not_found() {
        let query = FakeQuery::returning(singleton_query_result(cuid()));
        let fm = FakeFmResolver::scripted(vec![Ok(ResolvedServicePartitions {
            entries: vec![ServiceTableEntry {
                cuid: cuid(),
                version: 7,
                replica_set: ServiceReplicaSet::default(),
            }],
            generation: GenerationNumber(3),
        })]);
        let resolver = resolver(&query, &fm);

        let error = resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(error, FabricError::SystemServiceNotFound);
    }

    #[tokio::test]
    async fn test_reserved_fabric_service_parses_json_endpoints() {
        let fabsrv = reserved::backup_restore_service();
        let inner = published_location(fabsrv);
        let document = format!(
            r#"{{"Endpoints":{{"tcp":"{inner}","https":"https://10.0.0.1:443"}}}}"#
        );

        let query = FakeQuery::returning(singleton_query_result(fabsrv));
        let fm = FakeFmResolver::scripted(vec![Ok(fm_reply_with_location(fabsrv, 7, 3, document))]);
        let resolver = resolver(&query, &fm);

        let resolved = resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(resolved.primary_location.host_address(), "10.0.0.1:1234");
    }

    #[tokio::test]
    async fn test_dynamic_id_fabric_service_parses_json_endpoints_by_name() {
        let dynamic_cuid = PartitionId::generate();
        let inner = published_location(dynamic_cuid);
        let document = format!(r#"{{"Endpoints":{{"tcp":"{inner}"}}}}"#);
        let name = ServiceName::try_new("fabric:/System/GatewayResourceManager").unwrap();

        let query = FakeQuery::returning(singleton_query_result(dynamic_cuid));
        let fm = FakeFmResolver::scripted(vec![Ok(fm_reply_with_location(
            dynamic_cuid,
            7,
            3,
            document,
        ))]);
        let resolver = resolver(&query, &fm);

        let resolved = resolver
            .resolve_by_name(&name, ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(resolved.primary_location.host_address(), "10.0.0.1:1234");
    }

    #[tokio::test]
    async fn test_event_store_succeeds_with_empty_host() {
        let event_store = reserved::event_store_service();
        let query = FakeQuery::returning(singleton_query_result(event_store));
        let fm = FakeFmResolver::scripted(vec![Ok(fm_reply_with_location(
            event_store,
            7,
            3,
            r#"{"Endpoints":{"https":"https://10.0.0.3:19080"}}"#.to_string(),
        ))]);
        let resolver = resolver(&query, &fm);

        let resolved = resolver
            .resolve_by_name(&service_name(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(resolved.primary_location.host_address(), "");
    }

    #[tokio::test]
    async fn test_resolve_by_cuid_returns_entries_and_generation() {
        let query = FakeQuery::returning(vec![]);
        let fm = FakeFmResolver::scripted(vec![Ok(fm_reply(cuid(), 7, 3))]);
        let resolver = resolver(&query, &fm);

        let resolved = resolver
            .resolve_by_cuid(cuid(), ActivityId::generate(), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(resolved.entries.len(), 1);
        assert_eq!(resolved.generation, GenerationNumber(3));
        assert_eq!(resolved.partition_info, PartitionInfo::Singleton);
        assert_eq!(query.call_count(), 0);
    }
}
