//! In-memory transport fakes shared by the integration suites
//!
//! These implement the crate's transport contracts over channels so the full
//! routed and direct message paths can run inside one process: an IPC hub per
//! node, a cluster-wide federation hub, a datagram network for direct
//! messaging, and scripted query/FM collaborators for the resolver.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use switchboard::domain_types::{ActivityId, HostId, VersionedServiceTypeId};
use switchboard::error::FabricError;
use switchboard::location::ServiceLocation;
use switchboard::message::{Actor, Message};
use switchboard::resolver::{
    CacheMode, GenerationNumber, PartitionInfo, PartitionResolver, QueryGateway,
    ResolvedServicePartitions, ServicePartitionListBody, ServicePartitionQueryResult,
    ServiceReplicaSet, ServiceTableEntry, VersionedCuid,
};
use switchboard::routing::RoutingAgentMessage;
use switchboard::transport::{
    DatagramTransport, FederationTransport, GatewayMessageHandler, HostingSubsystem, IpcClient,
    IpcServer, MessageHandler, NamingGateway, OnewayMessageHandler, ReceiverContext, SendTarget,
};
use switchboard::{PartitionId, ServiceName, ServiceTypeId};

async fn invoke_request_handler(
    handler: MessageHandler,
    message: Message,
    timeout: Duration,
) -> Result<Message, FabricError> {
    let (context, reply_rx) = ReceiverContext::channel();
    handler(message, context);

    match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(FabricError::operation_failed("peer dropped the reply")),
        Err(_) => Err(FabricError::OperationTimeout),
    }
}

// *** Local IPC

/// One node's IPC channel: the node side plus any number of host processes
#[derive(Default)]
pub struct InMemoryIpcHub {
    server_handlers: DashMap<Actor, MessageHandler>,
    client_handlers: DashMap<(HostId, Actor), MessageHandler>,
    server_to_client_requests: AtomicUsize,
}

impl InMemoryIpcHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of node → host requests that have been attempted
    pub fn server_to_client_requests(&self) -> usize {
        self.server_to_client_requests.load(Ordering::SeqCst)
    }

    /// A host-side endpoint registered under `client_id`
    pub fn client(self: &Arc<Self>, client_id: HostId) -> Arc<InMemoryIpcClient> {
        Arc::new(InMemoryIpcClient {
            hub: Arc::clone(self),
            client_id,
        })
    }
}

#[async_trait]
impl IpcServer for InMemoryIpcHub {
    fn register_message_handler(&self, actor: Actor, handler: MessageHandler) {
        self.server_handlers.insert(actor, handler);
    }

    fn unregister_message_handler(&self, actor: Actor) {
        self.server_handlers.remove(&actor);
    }

    async fn request(
        &self,
        message: Message,
        client_id: HostId,
        timeout: Duration,
    ) -> Result<Message, FabricError> {
        self.server_to_client_requests.fetch_add(1, Ordering::SeqCst);

        let handler = self
            .client_handlers
            .get(&(client_id, message.actor()))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(FabricError::CannotConnectToAnonymousTarget)?;

        invoke_request_handler(handler, message, timeout).await
    }
}

/// Host-side endpoint of an [`InMemoryIpcHub`]
pub struct InMemoryIpcClient {
    hub: Arc<InMemoryIpcHub>,
    client_id: HostId,
}

#[async_trait]
impl IpcClient for InMemoryIpcClient {
    fn client_id(&self) -> HostId {
        self.client_id.clone()
    }

    fn register_message_handler(&self, actor: Actor, handler: MessageHandler) {
        self.hub
            .client_handlers
            .insert((self.client_id.clone(), actor), handler);
    }

    fn unregister_message_handler(&self, actor: Actor) {
        self.hub
            .client_handlers
            .remove(&(self.client_id.clone(), actor));
    }

    async fn request(&self, message: Message, timeout: Duration) -> Result<Message, FabricError> {
        let handler = self
            .hub
            .server_handlers
            .get(&message.actor())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(FabricError::CannotConnectToAnonymousTarget)?;

        invoke_request_handler(handler, message, timeout).await
    }
}

// *** Federation

/// Cluster-wide federation hub; each node registers its handlers under its
/// node name
#[derive(Default)]
pub struct InMemoryFederation {
    handlers: DashMap<(String, Actor), MessageHandler>,
}

impl InMemoryFederation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The federation endpoint of one node
    pub fn node(self: &Arc<Self>, node_name: impl Into<String>) -> Arc<FederationNode> {
        Arc::new(FederationNode {
            hub: Arc::clone(self),
            node_name: node_name.into(),
        })
    }

    /// Delivers a request to `node_name`'s handler for the message's actor
    /// and awaits the reply
    pub async fn route_request(
        &self,
        node_name: &str,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, FabricError> {
        let handler = self
            .handlers
            .get(&(node_name.to_string(), message.actor()))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(FabricError::ConnectionDenied)?;

        invoke_request_handler(handler, message, timeout).await
    }
}

/// One node's view of the federation hub
pub struct FederationNode {
    hub: Arc<InMemoryFederation>,
    node_name: String,
}

impl FederationTransport for FederationNode {
    fn register_message_handler(
        &self,
        actor: Actor,
        _oneway: OnewayMessageHandler,
        request: MessageHandler,
    ) {
        self.hub
            .handlers
            .insert((self.node_name.clone(), actor), request);
    }

    fn unregister_message_handler(&self, actor: Actor) {
        self.hub.handlers.remove(&(self.node_name.clone(), actor));
    }
}

// *** Hosting

/// Static service type → host process map
#[derive(Default)]
pub struct FakeHosting {
    hosts: DashMap<ServiceTypeId, HostId>,
}

impl FakeHosting {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_host(&self, service_type: ServiceTypeId, host_id: HostId) {
        self.hosts.insert(service_type, host_id);
    }
}

impl HostingSubsystem for FakeHosting {
    fn host_id(
        &self,
        service_type: &VersionedServiceTypeId,
        _application_name: &str,
    ) -> Result<HostId, FabricError> {
        self.hosts
            .get(&service_type.type_id)
            .map(|entry| entry.value().clone())
            .ok_or(FabricError::SystemServiceNotFound)
    }
}

// *** Naming gateway

/// Routing plan the fake gateway applies to every outbound request
#[derive(Clone)]
pub struct GatewayRoute {
    /// Node whose routing agent receives the federation request
    pub target_node: String,
    /// Service type stamped into the routing wrapper
    pub service_type: ServiceTypeId,
    /// Destination replica whose filter is attached
    pub target_location: ServiceLocation,
}

/// Naming gateway fake: resolves every request to one configured destination,
/// wraps it, and routes it over the federation hub — the same wrap the real
/// gateway performs after resolution
pub struct FakeNamingGateway {
    federation: Arc<InMemoryFederation>,
    route: Mutex<Option<GatewayRoute>>,
    gateway_handlers: DashMap<Actor, GatewayMessageHandler>,
    seen_requests: Mutex<Vec<Message>>,
}

impl FakeNamingGateway {
    pub fn new(federation: Arc<InMemoryFederation>) -> Arc<Self> {
        Arc::new(Self {
            federation,
            route: Mutex::new(None),
            gateway_handlers: DashMap::new(),
            seen_requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_route(&self, route: GatewayRoute) {
        *self.route.lock().unwrap() = Some(route);
    }

    /// Requests observed by `process_request`, after unwrap by the agent
    pub fn seen_requests(&self) -> Vec<Message> {
        self.seen_requests.lock().unwrap().clone()
    }

    /// The gateway-ingress handler a routing agent registered, if any
    pub fn gateway_handler(&self, actor: Actor) -> Option<GatewayMessageHandler> {
        self.gateway_handlers
            .get(&actor)
            .map(|entry| Arc::clone(entry.value()))
    }
}

#[async_trait]
impl NamingGateway for FakeNamingGateway {
    async fn process_request(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, FabricError> {
        self.seen_requests.lock().unwrap().push(message.clone());

        let route = self
            .route
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FabricError::operation_failed("no gateway route configured"))?;

        let with_filter = message
            .into_builder()
            .filter(route.target_location.filter_header())
            .build();
        let wrapped = RoutingAgentMessage::wrap_for_routing_agent(with_filter, route.service_type);

        self.federation
            .route_request(&route.target_node, wrapped, timeout)
            .await
    }

    fn register_gateway_message_handler(&self, actor: Actor, handler: GatewayMessageHandler) {
        self.gateway_handlers.insert(actor, handler);
    }

    fn unregister_gateway_message_handler(&self, actor: Actor) {
        self.gateway_handlers.remove(&actor);
    }
}

// *** Datagram network

/// Cluster-wide datagram network for direct messaging
#[derive(Default)]
pub struct InMemoryNetwork {
    endpoints: DashMap<String, Arc<DashMap<Actor, MessageHandler>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a transport bound to `address`
    pub fn transport(self: &Arc<Self>, address: impl Into<String>) -> Arc<InMemoryDatagramTransport> {
        let address = address.into();
        let handlers = Arc::new(DashMap::new());
        self.endpoints.insert(address.clone(), Arc::clone(&handlers));

        Arc::new(InMemoryDatagramTransport {
            network: Arc::clone(self),
            address,
            handlers,
        })
    }
}

/// One endpoint of the [`InMemoryNetwork`]
pub struct InMemoryDatagramTransport {
    network: Arc<InMemoryNetwork>,
    address: String,
    handlers: Arc<DashMap<Actor, MessageHandler>>,
}

#[async_trait]
impl DatagramTransport for InMemoryDatagramTransport {
    async fn start(&self) -> Result<(), FabricError> {
        Ok(())
    }

    async fn stop(&self) {}

    fn register_message_handler(&self, actor: Actor, handler: MessageHandler) {
        self.handlers.insert(actor, handler);
    }

    fn unregister_message_handler(&self, actor: Actor) {
        self.handlers.remove(&actor);
    }

    fn resolve_target(&self, address: &str) -> Option<Arc<dyn SendTarget>> {
        let handlers = self.network.endpoints.get(address)?;
        Some(Arc::new(InMemoryTarget {
            address: address.to_string(),
            handlers: Arc::clone(handlers.value()),
        }))
    }
}

/// A resolved peer endpoint on the in-memory network
pub struct InMemoryTarget {
    address: String,
    handlers: Arc<DashMap<Actor, MessageHandler>>,
}

#[async_trait]
impl SendTarget for InMemoryTarget {
    fn address(&self) -> &str {
        &self.address
    }

    async fn request(&self, message: Message, timeout: Duration) -> Result<Message, FabricError> {
        let handler = self
            .handlers
            .get(&message.actor())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(FabricError::ConnectionDenied)?;

        invoke_request_handler(handler, message, timeout).await
    }
}

// *** Resolver collaborators

/// Query gateway fake answering every partition-list query with one
/// configured partition
pub struct FakeQueryGateway {
    partition: PartitionId,
}

impl FakeQueryGateway {
    pub fn singleton(partition: PartitionId) -> Arc<Self> {
        Arc::new(Self { partition })
    }
}

#[async_trait]
impl QueryGateway for FakeQueryGateway {
    async fn process_incoming_query(
        &self,
        _message: Message,
        _activity_id: ActivityId,
        _timeout: Duration,
    ) -> Result<Message, FabricError> {
        Ok(Message::builder(Actor::NamingGateway, "QueryReply")
            .typed_body(&ServicePartitionListBody {
                partitions: vec![ServicePartitionQueryResult {
                    partition_id: self.partition,
                    partition_info: PartitionInfo::default(),
                }],
            })?
            .build())
    }
}

/// FM resolver fake publishing whatever location is currently configured
pub struct FakePartitionResolver {
    published: Mutex<Result<(PartitionId, String, u64), FabricError>>,
}

impl FakePartitionResolver {
    pub fn publishing(cuid: PartitionId, location: &ServiceLocation, version: u64) -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Ok((cuid, location.to_string(), version))),
        })
    }

    pub fn publish(&self, cuid: PartitionId, location: &ServiceLocation, version: u64) {
        *self.published.lock().unwrap() = Ok((cuid, location.to_string(), version));
    }

    pub fn fail_with(&self, error: FabricError) {
        *self.published.lock().unwrap() = Err(error);
    }
}

#[async_trait]
impl PartitionResolver for FakePartitionResolver {
    async fn resolve_service_partition(
        &self,
        _partitions: Vec<VersionedCuid>,
        _cache_mode: CacheMode,
        _activity_id: ActivityId,
        _timeout: Duration,
    ) -> Result<ResolvedServicePartitions, FabricError> {
        let (cuid, location, version) = self.published.lock().unwrap().clone()?;

        Ok(ResolvedServicePartitions {
            entries: vec![ServiceTableEntry {
                cuid,
                version,
                replica_set: ServiceReplicaSet {
                    primary_location: Some(location),
                    secondary_locations: Vec::new(),
                },
            }],
            generation: GenerationNumber(1),
        })
    }
}

/// Shorthand for names used across the suites
pub fn service_name(name: &str) -> ServiceName {
    ServiceName::try_new(name).unwrap()
}

/// Shorthand for service types used across the suites
pub fn service_type(name: &str) -> ServiceTypeId {
    ServiceTypeId::try_new(name).unwrap()
}

/// Shorthand for host ids used across the suites
pub fn host_id(name: &str) -> HostId {
    HostId::try_new(name).unwrap()
}
