//! Host-side direct messaging agent
//!
//! Listens on a dedicated transport endpoint per host process and dispatches
//! incoming direct requests to the replica handler whose filter matches.
//! Requests with no matching handler get a typed
//! `DirectMessagingFailure` reply carrying
//! [`FabricError::MessageHandlerDoesNotExist`], which tells the caller to
//! re-resolve and retry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain_types::{ActivityId, NodeInstance};
use crate::error::FabricError;
use crate::filter::HandlerTable;
use crate::lifecycle::{Component, Lifecycle};
use crate::location::ServiceLocation;
use crate::direct::messages::DirectMessagingMessage;
use crate::message::{Actor, Message};
use crate::transport::{DatagramTransport, MessageHandler, ReceiverContext};

/// Accepts direct requests for the replicas hosted in this process. Cheaply
/// clonable; clones share the agent.
#[derive(Clone)]
pub struct DirectMessagingAgent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    node: NodeInstance,
    host_address: String,
    transport: Arc<dyn DatagramTransport>,
    handlers: HandlerTable<MessageHandler>,
    lifecycle: Lifecycle,
}

impl DirectMessagingAgent {
    /// Creates an agent listening on `host_address` via `transport`
    #[must_use]
    pub fn new(
        node: NodeInstance,
        host_address: impl Into<String>,
        transport: Arc<dyn DatagramTransport>,
    ) -> Self {
        let host_address = host_address.into();
        info!(node = %node, address = %host_address, "direct messaging agent created");

        Self {
            inner: Arc::new(AgentInner {
                node,
                host_address,
                transport,
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

    /// The transport endpoint this agent listens on
    #[must_use]
    pub fn host_address(&self) -> &str {
        &self.inner.host_address
    }

    /// Registers `handler` for direct requests addressed to `location`,
    /// replacing any previous registration
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

    /// Sends a reply back on the context of a direct request
    pub fn send_direct_reply(&self, reply: Message, context: ReceiverContext) {
        context.reply(reply);
    }

    /// Sends the typed failure reply on the context of a direct request
    pub fn on_direct_failure(
        &self,
        error: FabricError,
        context: ReceiverContext,
        activity_id: ActivityId,
    ) {
        self.inner.on_direct_failure(error, context, activity_id);
    }
}

#[async_trait]
impl Component for DirectMessagingAgent {
    async fn open(&self) -> Result<(), FabricError> {
        self.inner.lifecycle.transition_to_opened()?;

        self.inner.transport.start().await.inspect_err(|error| {
            info!(node = %self.inner.node, %error, "transport start failed");
        })?;

        let inner = Arc::clone(&self.inner);
        self.inner.transport.register_message_handler(
            Actor::DirectMessagingAgent,
            Arc::new(move |message, context| {
                inner.process_direct_request(message, context);
            }),
        );

        Ok(())
    }

    async fn close(&self) -> Result<(), FabricError> {
        self.inner.lifecycle.transition_to_closed();
        self.inner.cleanup().await;
        Ok(())
    }

    fn abort(&self) {
        self.inner.lifecycle.transition_to_aborted();
        self.inner
            .transport
            .unregister_message_handler(Actor::DirectMessagingAgent);
        self.inner.handlers.clear();

        // Abort must not await in-flight work, but it releases the transport
        // just like close does; the stop runs detached.
        let transport = Arc::clone(&self.inner.transport);
        tokio::spawn(async move {
            transport.stop().await;
        });
    }
}

impl AgentInner {
    async fn cleanup(&self) {
        self.transport
            .unregister_message_handler(Actor::DirectMessagingAgent);
        self.transport.stop().await;
        self.handlers.clear();
    }

    fn process_direct_request(&self, message: Message, context: ReceiverContext) {
        debug!(
            node = %self.node,
            activity = %message.activity_id_or_empty(),
            message_id = ?message.message_id(),
            "processing direct request"
        );

        let activity_id = message.activity_id_or_empty();

        let Some(handler) = self.handlers.lookup(&message) else {
            self.on_direct_failure(
                FabricError::MessageHandlerDoesNotExist,
                context,
                activity_id,
            );
            return;
        };

        match DirectMessagingMessage::unwrap_from_transport(message) {
            // The service replies directly on the context.
            Ok(unwrapped) => handler(unwrapped, context),
            Err(_) => self.on_direct_failure(FabricError::InvalidMessage, context, activity_id),
        }
    }

    fn on_direct_failure(
        &self,
        error: FabricError,
        context: ReceiverContext,
        activity_id: ActivityId,
    ) {
        context.reply(DirectMessagingMessage::create_failure_message(
            error,
            activity_id,
        ));
    }
}
