//! Contracts toward the transports and subsystems the core rides on
//!
//! The routing and messaging components never own a socket. Everything they
//! need from the federation overlay, the local IPC channel, the naming
//! gateway, the hosting subsystem, and the per-host datagram transport is
//! captured by the traits in this module; production implementations live in
//! the embedding process and tests supply in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::warn;

use crate::domain_types::{HostId, VersionedServiceTypeId};
use crate::error::FabricError;
use crate::message::{Actor, Message};

/// Reply channel handed to a message handler together with the request.
///
/// Exactly one of [`reply`](ReceiverContext::reply) or
/// [`reject`](ReceiverContext::reject) is called per request; dropping the
/// context without either surfaces as a transport failure at the sender.
#[derive(Debug)]
pub struct ReceiverContext {
    reply_tx: oneshot::Sender<Result<Message, FabricError>>,
}

impl ReceiverContext {
    /// Creates a context and the receiving half the transport awaits
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<Result<Message, FabricError>>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        (Self { reply_tx }, reply_rx)
    }

    /// Completes the request with a reply message
    pub fn reply(self, message: Message) {
        if self.reply_tx.send(Ok(message)).is_err() {
            warn!("reply dropped: requester is gone");
        }
    }

    /// Completes the request with an error
    pub fn reject(self, error: FabricError) {
        if self.reply_tx.send(Err(error)).is_err() {
            warn!("rejection dropped: requester is gone");
        }
    }
}

/// Handler invoked with a request and the context to answer it on
pub type MessageHandler = Arc<dyn Fn(Message, ReceiverContext) + Send + Sync>;

/// Handler invoked with a one-way message
pub type OnewayMessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Handler the naming gateway drives for routable actors: takes the request
/// and its timeout, returns the reply
pub type GatewayMessageHandler =
    Arc<dyn Fn(Message, Duration) -> BoxFuture<'static, Result<Message, FabricError>> + Send + Sync>;

/// Inter-node request transport provided by the federation overlay.
///
/// The core registers for request/reply only; its one-way callback records a
/// coding error if it ever fires.
pub trait FederationTransport: Send + Sync {
    /// Registers the handlers for messages addressed to `actor`
    fn register_message_handler(
        &self,
        actor: Actor,
        oneway: OnewayMessageHandler,
        request: MessageHandler,
    );

    /// Removes the handlers for `actor`
    fn unregister_message_handler(&self, actor: Actor);
}

/// Node-side endpoint of the local inter-process channel to service hosts
#[async_trait]
pub trait IpcServer: Send + Sync {
    /// Registers the handler for inbound messages addressed to `actor`
    fn register_message_handler(&self, actor: Actor, handler: MessageHandler);

    /// Removes the handler for `actor`
    fn unregister_message_handler(&self, actor: Actor);

    /// Sends a request to the host process registered as `client_id` and
    /// awaits its reply. A vanished peer yields
    /// [`FabricError::CannotConnectToAnonymousTarget`].
    async fn request(
        &self,
        message: Message,
        client_id: HostId,
        timeout: Duration,
    ) -> Result<Message, FabricError>;
}

/// Host-side endpoint of the local inter-process channel to the node
#[async_trait]
pub trait IpcClient: Send + Sync {
    /// The hosting-issued id this process is registered under
    fn client_id(&self) -> HostId;

    /// Registers the handler for inbound messages addressed to `actor`
    fn register_message_handler(&self, actor: Actor, handler: MessageHandler);

    /// Removes the handler for `actor`
    fn unregister_message_handler(&self, actor: Actor);

    /// Sends a request to the node and awaits its reply
    async fn request(&self, message: Message, timeout: Duration) -> Result<Message, FabricError>;
}

/// The naming gateway: entry point for requests leaving this node toward the
/// rest of the cluster, and registrar for actors routable through it
#[async_trait]
pub trait NamingGateway: Send + Sync {
    /// Hands a request to the gateway for cluster-wide processing and awaits
    /// the reply
    async fn process_request(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, FabricError>;

    /// Registers a handler the gateway invokes for messages addressed to
    /// `actor`
    fn register_gateway_message_handler(&self, actor: Actor, handler: GatewayMessageHandler);

    /// Removes the gateway handler for `actor`
    fn unregister_gateway_message_handler(&self, actor: Actor);
}

/// Host process lookup provided by the hosting subsystem
pub trait HostingSubsystem: Send + Sync {
    /// Maps a service type to the host process currently running it within
    /// `application_name`. Unknown types yield
    /// [`FabricError::SystemServiceNotFound`].
    fn host_id(
        &self,
        service_type: &VersionedServiceTypeId,
        application_name: &str,
    ) -> Result<HostId, FabricError>;
}

/// A resolved peer endpoint of the datagram transport; caches the underlying
/// connection so repeated requests skip the handshake
#[async_trait]
pub trait SendTarget: Send + Sync {
    /// The address this target points at
    fn address(&self) -> &str;

    /// Sends a request to the peer and awaits its reply
    async fn request(&self, message: Message, timeout: Duration) -> Result<Message, FabricError>;
}

/// Per-host datagram transport used by direct messaging
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Starts listening on the host address
    async fn start(&self) -> Result<(), FabricError>;

    /// Stops listening and drops open connections
    async fn stop(&self);

    /// Registers the handler for inbound messages addressed to `actor`
    fn register_message_handler(&self, actor: Actor, handler: MessageHandler);

    /// Removes the handler for `actor`
    fn unregister_message_handler(&self, actor: Actor);

    /// Resolves `address` to a reusable send target, or `None` when the
    /// address cannot be resolved
    fn resolve_target(&self, address: &str) -> Option<Arc<dyn SendTarget>>;
}
