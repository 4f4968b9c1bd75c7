//! Node-side routing agent
//!
//! One routing agent runs per node. It opens three ingresses at once:
//!
//! - **Local IPC**: a co-located host process asks "route this request into
//!   the cluster" — the agent unwraps it and hands it to the naming gateway.
//! - **Federation**: a peer node asks "deliver this request to the host
//!   running service type X" — the agent maps the type to a host process and
//!   forwards over IPC.
//! - **Gateway**: the naming gateway delivers routed requests with the same
//!   semantics as federation ingress.
//!
//! Failures report through the channel they arrived on: IPC ingress answers
//! with a typed `IpcFailure` reply, federation ingress rejects the receiver
//! context, gateway ingress surfaces the error as the operation result.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::config::FabricConfig;
use crate::domain_types::{ActivityId, HostId, NodeInstance, ServiceTypeId, VersionedServiceTypeId};
use crate::error::FabricError;
use crate::lifecycle::{Component, Lifecycle};
use crate::message::{Actor, Message, actions};
use crate::routing::messages::RoutingAgentMessage;
use crate::transport::{
    FederationTransport, HostingSubsystem, IpcServer, NamingGateway, ReceiverContext,
};
use crate::utils::{Deadline, with_timeout};

/// Bridges host processes, peer nodes, and the naming gateway into one
/// message-routing mesh. Cheaply clonable; clones share the agent.
#[derive(Clone)]
pub struct RoutingAgent {
    inner: Arc<RoutingAgentInner>,
}

struct RoutingAgentInner {
    node: NodeInstance,
    ipc: Arc<dyn IpcServer>,
    federation: Arc<dyn FederationTransport>,
    hosting: Arc<dyn HostingSubsystem>,
    naming: Arc<dyn NamingGateway>,
    config: FabricConfig,
    lifecycle: Lifecycle,
}

impl RoutingAgent {
    /// Creates a routing agent over the node's transports
    #[must_use]
    pub fn new(
        node: NodeInstance,
        ipc: Arc<dyn IpcServer>,
        federation: Arc<dyn FederationTransport>,
        hosting: Arc<dyn HostingSubsystem>,
        naming: Arc<dyn NamingGateway>,
        config: FabricConfig,
    ) -> Self {
        info!(node = %node, "routing agent created");

        Self {
            inner: Arc::new(RoutingAgentInner {
                node,
                ipc,
                federation,
                hosting,
                naming,
                config,
                lifecycle: Lifecycle::new(),
            }),
        }
    }

    /// The node this agent runs on
    #[must_use]
    pub fn node(&self) -> &NodeInstance {
        &self.inner.node
    }
}

#[async_trait]
impl Component for RoutingAgent {
    async fn open(&self) -> Result<(), FabricError> {
        self.inner.lifecycle.transition_to_opened()?;

        info!(node = %self.inner.node, "routing agent registering handlers");

        let ipc_inner = Arc::clone(&self.inner);
        self.inner.ipc.register_message_handler(
            Actor::ServiceRoutingAgent,
            Arc::new(move |message, context| {
                let inner = Arc::clone(&ipc_inner);
                tokio::spawn(async move {
                    inner.process_ipc_request(message, context).await;
                });
            }),
        );

        let federation_inner = Arc::clone(&self.inner);
        self.inner.federation.register_message_handler(
            Actor::ServiceRoutingAgent,
            Arc::new(|message| {
                error!(
                    message_id = ?message.message_id(),
                    "routing agent does not support oneway messages"
                );
                debug_assert!(false, "routing agent does not support oneway messages");
            }),
            Arc::new(move |message, context| {
                let inner = Arc::clone(&federation_inner);
                tokio::spawn(async move {
                    inner.process_federation_request(message, context).await;
                });
            }),
        );

        let gateway_inner = Arc::clone(&self.inner);
        self.inner.naming.register_gateway_message_handler(
            Actor::ServiceRoutingAgent,
            Arc::new(move |message, timeout| {
                let inner = Arc::clone(&gateway_inner);
                Box::pin(async move { inner.route_gateway_message(message, timeout).await })
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

impl RoutingAgentInner {
    fn cleanup(&self) {
        self.federation
            .unregister_message_handler(Actor::ServiceRoutingAgent);
        self.ipc
            .unregister_message_handler(Actor::ServiceRoutingAgent);
        self.naming
            .unregister_gateway_message_handler(Actor::ServiceRoutingAgent);
    }

    fn is_valid_request(&self, message: &Message) -> bool {
        if message.actor() != Actor::ServiceRoutingAgent {
            info!(node = %self.node, actor = ?message.actor(), "invalid actor");
            return false;
        }

        if message.timeout().is_none() {
            info!(node = %self.node, action = %message.action(), "missing timeout header");
            return false;
        }

        true
    }

    // *** IPC ingress: service-to-node

    async fn process_ipc_request(&self, message: Message, context: ReceiverContext) {
        if !self.is_valid_request(&message) {
            self.send_ipc_failure(FabricError::InvalidMessage, context, ActivityId::empty());
            return;
        }

        let activity_id = message.activity_id_or_empty();
        let Some(timeout) = message.timeout() else {
            self.send_ipc_failure(FabricError::InvalidMessage, context, activity_id);
            return;
        };

        if message.action() != actions::SERVICE_ROUTE_REQUEST {
            info!(node = %self.node, action = %message.action(), "invalid action");
            self.send_ipc_failure(FabricError::InvalidMessage, context, activity_id);
            return;
        }

        match self.service_to_node(message, Deadline::after(timeout)).await {
            Ok(mut reply) => {
                // Kept from the days when leftover deleted headers broke IPC
                // signature checks.
                reply.compact();
                context.reply(reply);
            }
            Err(error) => self.send_ipc_failure(error, context, activity_id),
        }
    }

    async fn service_to_node(
        &self,
        message: Message,
        deadline: Deadline,
    ) -> Result<Message, FabricError> {
        let request = RoutingAgentMessage::unwrap_from_ipc(message)?;

        debug!(
            node = %self.node,
            activity = %request.activity_id_or_empty(),
            actor = ?request.actor(),
            action = %request.action(),
            "forwarding request to naming"
        );

        with_timeout(
            deadline.remaining(),
            self.naming.process_request(request, deadline.remaining()),
        )
        .await
    }

    fn send_ipc_failure(
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

    // *** Federation ingress: node-to-service

    async fn process_federation_request(&self, message: Message, context: ReceiverContext) {
        if !self.is_valid_request(&message) {
            context.reject(FabricError::InvalidMessage);
            return;
        }

        let Some(timeout) = message.timeout() else {
            context.reject(FabricError::InvalidMessage);
            return;
        };

        if message.action() != actions::SERVICE_ROUTE_REQUEST {
            info!(node = %self.node, action = %message.action(), "invalid action");
            context.reject(FabricError::InvalidMessage);
            return;
        }

        match self.node_to_service(message, Deadline::after(timeout)).await {
            Ok(reply) => context.reply(reply),
            Err(error) => context.reject(error),
        }
    }

    async fn node_to_service(
        &self,
        message: Message,
        deadline: Deadline,
    ) -> Result<Message, FabricError> {
        let Some(routing_header) = message.routing_agent_header().cloned() else {
            error!(
                node = %self.node,
                message_id = ?message.message_id(),
                "routing agent header missing"
            );
            return Err(FabricError::InvalidMessage);
        };

        let host_id = self.host_id(&routing_header.service_type_id)?;

        let mut request = RoutingAgentMessage::rewrap_for_proxy(message, &routing_header)?;

        debug!(
            node = %self.node,
            activity = %request.activity_id_or_empty(),
            service_type = %routing_header.service_type_id,
            host = %host_id,
            "forwarding request to host"
        );

        request.compact();

        let reply = match with_timeout(
            deadline.remaining(),
            self.ipc.request(request, host_id, deadline.remaining()),
        )
        .await
        {
            // The peer process is gone. Translate to an error the gateway
            // retries on: it will re-resolve and resend.
            Err(FabricError::CannotConnectToAnonymousTarget) => {
                return Err(FabricError::MessageHandlerDoesNotExist);
            }
            Err(error) => return Err(error),
            Ok(reply) => reply,
        };

        RoutingAgentMessage::validate_ipc_reply(&reply)?;

        Ok(reply)
    }

    fn host_id(&self, service_type_id: &ServiceTypeId) -> Result<HostId, FabricError> {
        self.hosting
            .host_id(
                &VersionedServiceTypeId::new(service_type_id.clone()),
                &self.config.system_service_application_name,
            )
            .inspect_err(|error| {
                info!(
                    node = %self.node,
                    service_type = %service_type_id,
                    %error,
                    "host id for service type not found"
                );
            })
    }

    // *** Gateway ingress

    async fn route_gateway_message(
        &self,
        message: Message,
        timeout: std::time::Duration,
    ) -> Result<Message, FabricError> {
        if message.action() != actions::SERVICE_ROUTE_REQUEST {
            info!(
                node = %self.node,
                action = %message.action(),
                "invalid action in gateway routing message"
            );
            return Err(FabricError::InvalidMessage);
        }

        self.node_to_service(message, Deadline::after(timeout)).await
    }
}
