//! Messages: typed headers plus a typed body
//!
//! A [`Message`] is an immutable bag of typed headers and a serialized body.
//! Wrapping and unwrapping for each hop never mutate headers in place; they
//! rebuild the bag through [`MessageBuilder`], which keeps every intermediate
//! state well-formed and makes the pass-through rules explicit at each hop.
//!
//! The pass-through header set preserved across every wrap/unwrap:
//! activity id (synthesized if absent — never dropped), timeout, message id,
//! query address, and request instance, plus the filter header on the
//! direct/proxy paths.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain_types::{
    ActivityId, MessageId, PartitionId, ReplicaId, ReplicaInstance, ServiceTypeId,
};
use crate::error::FabricError;
use std::time::Duration;

/// Message actors recognized on the system-service mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    /// Node-side routing agent
    ServiceRoutingAgent,
    /// Host-side direct messaging agent
    DirectMessagingAgent,
    /// The naming gateway
    NamingGateway,
    /// The naming store service
    NamingService,
    /// The failover manager
    FailoverManager,
    /// The cluster manager
    ClusterManager,
    /// The image/file store service
    FileStoreService,
    /// The token validation service
    TokenValidationService,
    /// The repair manager
    RepairManager,
    /// The infrastructure service
    InfrastructureService,
}

/// Reserved wire actions
pub mod actions {
    /// Routed request entering or leaving a routing agent
    pub const SERVICE_ROUTE_REQUEST: &str = "ServiceRouteRequest";
    /// Request forwarded to the naming gateway
    pub const FORWARD_MESSAGE: &str = "ForwardMessage";
    /// Fast path to the file store service
    pub const FORWARD_TO_FILE_STORE_MESSAGE: &str = "ForwardToFileStoreMessage";
    /// Fast path to the token validation service
    pub const FORWARD_TO_TVS_MESSAGE: &str = "ForwardToTvsMessage";
    /// Direct request addressed to a replica by filter
    pub const DIRECT_MESSAGING: &str = "DirectMessaging";
    /// Typed failure reply on the direct channel
    pub const DIRECT_MESSAGING_FAILURE: &str = "DirectMessagingFailure";
    /// Typed failure reply on the IPC channel
    pub const IPC_FAILURE: &str = "IpcFailure";
}

/// Selects one replica among co-hosted replicas of a partition.
///
/// Carried on every routed and direct request. Ordering is lexicographic on
/// (partition, replica id, replica instance) so it can key an ordered map.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FilterHeader {
    /// Target partition
    pub partition_id: PartitionId,
    /// Target replica id; `0` matches any replica of the partition
    pub replica_id: ReplicaId,
    /// Target replica instance; `0` matches any instance
    pub replica_instance: ReplicaInstance,
}

impl FilterHeader {
    /// Creates a filter header for an exact replica instance
    #[must_use]
    pub fn new(
        partition_id: PartitionId,
        replica_id: ReplicaId,
        replica_instance: ReplicaInstance,
    ) -> Self {
        Self {
            partition_id,
            replica_id,
            replica_instance,
        }
    }

    /// Creates a filter header that matches any replica of the partition
    #[must_use]
    pub fn any_replica(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            replica_id: ReplicaId::any_replica(),
            replica_instance: ReplicaInstance::any_instance(),
        }
    }
}

/// Node-to-node routing wrapper: the logical (actor, action) plus the target
/// service type used by the receiving node for host lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingAgentHeader {
    /// Logical actor restored after unwrap
    pub actor: Actor,
    /// Logical action restored after unwrap
    pub action: String,
    /// Service type the receiving node resolves to a host process
    pub service_type_id: ServiceTypeId,
}

/// Host-to-node IPC wrapper carrying the logical (actor, action)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingAgentProxyHeader {
    /// Logical actor restored after unwrap
    pub actor: Actor,
    /// Logical action restored after unwrap
    pub action: String,
}

/// Wrapper used when forwarding to the naming gateway or its fast paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardMessageHeader {
    /// Logical actor restored after unwrap
    pub actor: Actor,
    /// Logical action restored after unwrap
    pub action: String,
}

/// Direct-messaging wrapper carrying the logical (actor, action)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessagingHeader {
    /// Logical actor restored after unwrap
    pub actor: Actor,
    /// Logical action restored after unwrap
    pub action: String,
}

/// Query destination address, passed through on query-bearing requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAddressHeader(
    /// The query destination address
    pub String,
);

/// Request instance number used by idempotent retry filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInstanceHeader(
    /// The request instance number
    pub i64,
);

/// A typed message: header bag plus serialized body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    actor: Actor,
    action: String,
    activity_id: Option<ActivityId>,
    timeout: Option<Duration>,
    message_id: Option<MessageId>,
    query_address: Option<QueryAddressHeader>,
    request_instance: Option<RequestInstanceHeader>,
    filter: Option<FilterHeader>,
    routing_agent: Option<RoutingAgentHeader>,
    routing_proxy: Option<RoutingAgentProxyHeader>,
    forward: Option<ForwardMessageHeader>,
    direct: Option<DirectMessagingHeader>,
    body: Bytes,
}

impl Message {
    /// Starts building a message with the given logical (actor, action)
    #[must_use]
    pub fn builder(actor: Actor, action: impl Into<String>) -> MessageBuilder {
        MessageBuilder {
            message: Message {
                actor,
                action: action.into(),
                activity_id: None,
                timeout: None,
                message_id: Some(MessageId::generate()),
                query_address: None,
                request_instance: None,
                filter: None,
                routing_agent: None,
                routing_proxy: None,
                forward: None,
                direct: None,
                body: Bytes::new(),
            },
        }
    }

    /// Reopens the header bag for rebuilding; used by the wrap/unwrap paths
    #[must_use]
    pub fn into_builder(self) -> MessageBuilder {
        MessageBuilder { message: self }
    }

    /// The message actor
    #[must_use]
    pub fn actor(&self) -> Actor {
        self.actor
    }

    /// The message action
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Activity id, if present
    #[must_use]
    pub fn activity_id(&self) -> Option<ActivityId> {
        self.activity_id
    }

    /// Activity id, or the empty id when the message carries none
    #[must_use]
    pub fn activity_id_or_empty(&self) -> ActivityId {
        self.activity_id.unwrap_or_else(ActivityId::empty)
    }

    /// Timeout budget header, if present
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Message id, if present
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        self.message_id
    }

    /// Query address header, if present
    #[must_use]
    pub fn query_address(&self) -> Option<&QueryAddressHeader> {
        self.query_address.as_ref()
    }

    /// Request instance header, if present
    #[must_use]
    pub fn request_instance(&self) -> Option<RequestInstanceHeader> {
        self.request_instance
    }

    /// Replica filter header, if present
    #[must_use]
    pub fn filter(&self) -> Option<&FilterHeader> {
        self.filter.as_ref()
    }

    /// Node-to-node routing wrapper, if present
    #[must_use]
    pub fn routing_agent_header(&self) -> Option<&RoutingAgentHeader> {
        self.routing_agent.as_ref()
    }

    /// Host-to-node IPC wrapper, if present
    #[must_use]
    pub fn routing_proxy_header(&self) -> Option<&RoutingAgentProxyHeader> {
        self.routing_proxy.as_ref()
    }

    /// Forwarding wrapper, if present
    #[must_use]
    pub fn forward_header(&self) -> Option<&ForwardMessageHeader> {
        self.forward.as_ref()
    }

    /// Direct-messaging wrapper, if present
    #[must_use]
    pub fn direct_header(&self) -> Option<&DirectMessagingHeader> {
        self.direct.as_ref()
    }

    /// Raw body bytes
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decodes the body as `T`
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, FabricError> {
        serde_json::from_slice(&self.body).map_err(|e| FabricError::serialization(&e))
    }

    /// Header compaction, kept as an explicit step on the reply paths that
    /// compacted historically. The immutable header bag has nothing to
    /// compact, so this is a no-op.
    pub fn compact(&mut self) {}
}

/// Builder producing an immutable [`Message`]
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Sets the actor
    #[must_use]
    pub fn actor(mut self, actor: Actor) -> Self {
        self.message.actor = actor;
        self
    }

    /// Sets the action
    #[must_use]
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.message.action = action.into();
        self
    }

    /// Sets the activity id
    #[must_use]
    pub fn activity_id(mut self, activity_id: ActivityId) -> Self {
        self.message.activity_id = Some(activity_id);
        self
    }

    /// Sets or clears the activity id
    #[must_use]
    pub fn maybe_activity_id(mut self, activity_id: Option<ActivityId>) -> Self {
        self.message.activity_id = activity_id;
        self
    }

    /// Sets the timeout budget header
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.message.timeout = Some(timeout);
        self
    }

    /// Sets or clears the timeout budget header
    #[must_use]
    pub fn maybe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.message.timeout = timeout;
        self
    }

    /// Sets the message id
    #[must_use]
    pub fn message_id(mut self, message_id: MessageId) -> Self {
        self.message.message_id = Some(message_id);
        self
    }

    /// Sets or clears the message id
    #[must_use]
    pub fn maybe_message_id(mut self, message_id: Option<MessageId>) -> Self {
        self.message.message_id = message_id;
        self
    }

    /// Sets or clears the query address header
    #[must_use]
    pub fn maybe_query_address(mut self, query_address: Option<QueryAddressHeader>) -> Self {
        self.message.query_address = query_address;
        self
    }

    /// Sets or clears the request instance header
    #[must_use]
    pub fn maybe_request_instance(
        mut self,
        request_instance: Option<RequestInstanceHeader>,
    ) -> Self {
        self.message.request_instance = request_instance;
        self
    }

    /// Sets the replica filter header
    #[must_use]
    pub fn filter(mut self, filter: FilterHeader) -> Self {
        self.message.filter = Some(filter);
        self
    }

    /// Sets or clears the replica filter header
    #[must_use]
    pub fn maybe_filter(mut self, filter: Option<FilterHeader>) -> Self {
        self.message.filter = filter;
        self
    }

    /// Sets or clears the node-to-node routing wrapper
    #[must_use]
    pub fn maybe_routing_agent_header(mut self, header: Option<RoutingAgentHeader>) -> Self {
        self.message.routing_agent = header;
        self
    }

    /// Sets or clears the host-to-node IPC wrapper
    #[must_use]
    pub fn maybe_routing_proxy_header(mut self, header: Option<RoutingAgentProxyHeader>) -> Self {
        self.message.routing_proxy = header;
        self
    }

    /// Sets or clears the forwarding wrapper
    #[must_use]
    pub fn maybe_forward_header(mut self, header: Option<ForwardMessageHeader>) -> Self {
        self.message.forward = header;
        self
    }

    /// Sets or clears the direct-messaging wrapper
    #[must_use]
    pub fn maybe_direct_header(mut self, header: Option<DirectMessagingHeader>) -> Self {
        self.message.direct = header;
        self
    }

    /// Sets the raw body bytes
    #[must_use]
    pub fn body(mut self, body: Bytes) -> Self {
        self.message.body = body;
        self
    }

    /// Serializes `body` as the message body
    pub fn typed_body<T: Serialize>(mut self, body: &T) -> Result<Self, FabricError> {
        let bytes = serde_json::to_vec(body).map_err(|e| FabricError::serialization(&e))?;
        self.message.body = Bytes::from(bytes);
        Ok(self)
    }

    /// Finishes the bag
    #[must_use]
    pub fn build(self) -> Message {
        self.message
    }
}

/// Typed body of an `IpcFailure` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcFailureBody {
    /// The error being reported
    pub error: FabricError,
}

/// Typed body of a `DirectMessagingFailure` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessagingFailureBody {
    /// The error being reported
    pub error: FabricError,
}
