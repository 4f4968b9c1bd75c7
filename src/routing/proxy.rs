//! Host-side routing agent proxy
//!
//! One proxy runs per service host process. Outbound, it wraps a replica's
//! request for the IPC hop and sends it to the co-located routing agent.
//! Inbound, it receives routed requests the agent forwarded over IPC, picks
//! the replica handler whose filter matches, and hands over the unwrapped
//! message; the handler answers through [`RoutingAgentProxy::send_ipc_reply`]
//! or [`RoutingAgentProxy::on_ipc_failure`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain_types::{ActivityId, NodeInstance};
use crate::error::FabricError;
use crate::filter::HandlerTable;
use crate::lifecycle::{Component, Lifecycle};
use crate::location::ServiceLocation;
use crate::message::{Actor, Message};
use crate::routing::messages::RoutingAgentMessage;
use crate::transport::{IpcClient, MessageHandler, ReceiverContext};

/// Host-side endpoint of the routed message mesh. Cheaply clonable; clones
/// share the proxy.
#[derive(Clone)]
pub struct RoutingAgentProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    node: NodeInstance,
    ipc: Arc<dyn IpcClient>,
    handlers: HandlerTable<MessageHandler>,
    lifecycle: Lifecycle,
}

impl RoutingAgentProxy {
    /// Creates a proxy over the host's IPC client
    #[must_use]
    pub fn new(node: NodeInstance, ipc: Arc<dyn IpcClient>) -> Self {
        info!(node = %node, client_id = %ipc.client_id(), "routing agent proxy created");

        Self {
            inner: Arc::new(ProxyInner {
                node,
                ipc,
                handlers: HandlerTable::new(),
                lifecycle: Lifecycle::new(),
            }),
        }
    }

    /// The node this host process runs on
    #[must_use]
    pub fn node(&self) -> &NodeInstance {
        &self.inner.node
    }

    /// Registers `handler` for routed requests addressed to `location`,
    /// replacing any previous registration so a restarting replica cleanly
    /// supersedes its prior instance
    pub fn register_message_handler(
        &self,
        location: &ServiceLocation,
        handler: MessageHandler,
    ) -> Result<(), FabricError> {
        self.inner.lifecycle.require_opened()?;
        self.inner.handlers.set(location, handler);

        info!(node = %self.inner.node, %location, "registered system service location");
        Ok(())
    }

    /// Removes the registration for `location`
    pub fn unregister_message_handler(
        &self,
        location: &ServiceLocation,
    ) -> Result<(), FabricError> {
        self.inner.lifecycle.require_opened()?;
        self.inner.handlers.remove(location);

        info!(node = %self.inner.node, %location, "unregistered system service location");
        Ok(())
    }

    /// Routes a replica's request into the cluster: stamps the timeout
    /// header, wraps for the IPC hop, and awaits the routed reply. An
    /// `IpcFailure` reply surfaces as the typed error it carries.
    pub async fn send_request(
        &self,
        request: Message,
        timeout: Duration,
    ) -> Result<Message, FabricError> {
        self.inner.lifecycle.require_opened()?;

        let request = request.into_builder().timeout(timeout).build();
        let mut request = RoutingAgentMessage::wrap_for_ipc(request);
        request.compact();

        let reply = self.inner.ipc.request(request, timeout).await?;

        RoutingAgentMessage::validate_ipc_reply(&reply)?;

        Ok(reply)
    }

    /// Sends a reply back on the context of a routed request
    pub fn send_ipc_reply(&self, reply: Message, context: ReceiverContext) {
        context.reply(reply);
    }

    /// Sends the typed failure reply on the context of a routed request
    pub fn on_ipc_failure(
        &self,
        error: FabricError,
        context: ReceiverContext,
        activity_id: ActivityId,
    ) {
        self.inner.on_ipc_failure(error, context, activity_id);
    }
}

#[async_trait]
impl Component for RoutingAgentProxy {
    async fn open(&self) -> Result<(), FabricError> {
        self.inner.lifecycle.transition_to_opened()?;

        let inner = Arc::clone(&self.inner);
        self.inner.ipc.register_message_handler(
            Actor::ServiceRoutingAgent,
            Arc::new(move |message, context| {
                inner.process_ipc_request(message, context);
            }),
        );

        Ok(())
    }

    async fn close(&self) -> Result<(), FabricError> {
        self.inner.lifecycle.transition_to_closed();
        self.inner.cleanup();
        Ok(())
    }

    fn abort(&self) {
        self.inner.lifecycle.transition_to_aborted();
        self.inner.cleanup();
    }
}

impl ProxyInner {
    fn cleanup(&self) {
        self.ipc
            .unregister_message_handler(Actor::ServiceRoutingAgent);
        self.handlers.clear();
    }

    fn process_ipc_request(&self, message: Message, context: ReceiverContext) {
        debug!(
            node = %self.node,
            activity = %message.activity_id_or_empty(),
            message_id = ?message.message_id(),
            "processing routed request"
        );

        let activity_id = message.activity_id_or_empty();

        let Some(handler) = self.handlers.lookup(&message) else {
            self.on_ipc_failure(
                FabricError::MessageHandlerDoesNotExist,
                context,
                activity_id,
            );
            return;
        };

        match RoutingAgentMessage::unwrap_from_ipc(message) {
            // The service replies directly on the context.
            Ok(unwrapped) => handler(unwrapped, context),
            Err(_) => self.on_ipc_failure(FabricError::InvalidMessage, context, activity_id),
        }
    }

    fn on_ipc_failure(
        &self,
        error: FabricError,
        context: ReceiverContext,
        activity_id: ActivityId,
    ) {
        context.reply(RoutingAgentMessage::create_ipc_failure_message(
            error,
            activity_id,
        ));
    }
}
