//! Header save/restore rules for every routed hop
//!
//! Each hop performs exactly one wrap on send and one unwrap on receive. A
//! wrap stashes the logical (actor, action) in the hop's wrapper header and
//! retargets the message at the next agent; the matching unwrap restores the
//! logical pair so downstream handlers see the message they would have seen
//! locally. Every unwrap preserves the pass-through set — activity id
//! (synthesized when absent), timeout, message id, query address, request
//! instance — and the replica filter where the next hop still dispatches on
//! it.

use tracing::{error, warn};

use crate::domain_types::{ActivityId, ServiceTypeId};
use crate::error::FabricError;
use crate::message::{
    Actor, ForwardMessageHeader, IpcFailureBody, Message, RoutingAgentHeader,
    RoutingAgentProxyHeader, actions,
};

/// Wrap/unwrap operations of the routed message paths
pub struct RoutingAgentMessage;

impl RoutingAgentMessage {
    /// Wraps a host-originated request for the IPC hop to the node agent,
    /// stashing the message's own (actor, action)
    #[must_use]
    pub fn wrap_for_ipc(message: Message) -> Message {
        let actor = message.actor();
        let action = message.action().to_string();
        Self::wrap_for_ipc_as(message, actor, action)
    }

    /// Wraps for the IPC hop with an explicit logical (actor, action)
    #[must_use]
    pub fn wrap_for_ipc_as(message: Message, actor: Actor, action: String) -> Message {
        message
            .into_builder()
            .maybe_routing_proxy_header(Some(RoutingAgentProxyHeader { actor, action }))
            .actor(Actor::ServiceRoutingAgent)
            .action(actions::SERVICE_ROUTE_REQUEST)
            .build()
    }

    /// Strips the IPC wrapper, restoring the logical (actor, action) and the
    /// pass-through headers. Fails with `InvalidMessage` when the wrapper is
    /// missing.
    pub fn unwrap_from_ipc(message: Message) -> Result<Message, FabricError> {
        let Some(proxy_header) = message.routing_proxy_header().cloned() else {
            warn!(
                message_id = ?message.message_id(),
                "routing agent proxy header missing"
            );
            return Err(FabricError::InvalidMessage);
        };

        let activity_id = ensure_activity(&message);

        Ok(message
            .into_builder()
            .actor(proxy_header.actor)
            .action(proxy_header.action)
            .activity_id(activity_id)
            .maybe_filter(None)
            .maybe_routing_proxy_header(None)
            .maybe_routing_agent_header(None)
            .maybe_direct_header(None)
            .build())
    }

    /// Wraps a request for the federation hop to the node hosting
    /// `service_type_id`, stashing the message's own (actor, action)
    #[must_use]
    pub fn wrap_for_routing_agent(message: Message, service_type_id: ServiceTypeId) -> Message {
        let actor = message.actor();
        let action = message.action().to_string();
        message
            .into_builder()
            .maybe_routing_agent_header(Some(RoutingAgentHeader {
                actor,
                action,
                service_type_id,
            }))
            .actor(Actor::ServiceRoutingAgent)
            .action(actions::SERVICE_ROUTE_REQUEST)
            .build()
    }

    /// Converts a federation-wrapped request into the IPC form delivered to
    /// the target host's proxy: the filter and pass-through headers survive,
    /// the routing wrapper is replaced by a proxy wrapper carrying the same
    /// logical (actor, action). Fails with `InvalidMessage` when the filter
    /// header is missing.
    pub fn rewrap_for_proxy(
        message: Message,
        routing_header: &RoutingAgentHeader,
    ) -> Result<Message, FabricError> {
        if message.filter().is_none() {
            warn!(
                message_id = ?message.message_id(),
                "filter header missing"
            );
            return Err(FabricError::InvalidMessage);
        }

        let activity_id = ensure_activity(&message);

        let stripped = message
            .into_builder()
            .activity_id(activity_id)
            .maybe_routing_agent_header(None)
            .maybe_forward_header(None)
            .maybe_direct_header(None)
            .build();

        Ok(Self::wrap_for_ipc_as(
            stripped,
            routing_header.actor,
            routing_header.action.clone(),
        ))
    }

    /// Wraps a request for forwarding through the naming gateway
    #[must_use]
    pub fn wrap_for_forwarding(message: Message) -> Message {
        Self::wrap_for_forwarding_as(message, actions::FORWARD_MESSAGE)
    }

    /// Wraps a request for the file store fast path
    #[must_use]
    pub fn wrap_for_forwarding_to_file_store(message: Message) -> Message {
        Self::wrap_for_forwarding_as(message, actions::FORWARD_TO_FILE_STORE_MESSAGE)
    }

    /// Wraps a request for the token validation fast path
    #[must_use]
    pub fn wrap_for_forwarding_to_token_validation(message: Message) -> Message {
        Self::wrap_for_forwarding_as(message, actions::FORWARD_TO_TVS_MESSAGE)
    }

    fn wrap_for_forwarding_as(message: Message, action: &'static str) -> Message {
        let logical_actor = message.actor();
        let logical_action = message.action().to_string();
        message
            .into_builder()
            .maybe_forward_header(Some(ForwardMessageHeader {
                actor: logical_actor,
                action: logical_action,
            }))
            .actor(Actor::NamingGateway)
            .action(action)
            .build()
    }

    /// Strips the forwarding wrapper, restoring the logical (actor, action)
    pub fn unwrap_from_forwarding(message: Message) -> Result<Message, FabricError> {
        let Some(forward_header) = message.forward_header().cloned() else {
            warn!(
                message_id = ?message.message_id(),
                "forward message header missing"
            );
            return Err(FabricError::InvalidMessage);
        };

        let activity_id = ensure_activity(&message);

        Ok(message
            .into_builder()
            .actor(forward_header.actor)
            .action(forward_header.action)
            .activity_id(activity_id)
            .maybe_forward_header(None)
            .build())
    }

    /// Checks an IPC reply for the failure envelope; a failure reply yields
    /// the typed error it carries
    pub fn validate_ipc_reply(reply: &Message) -> Result<(), FabricError> {
        if reply.action() != actions::IPC_FAILURE {
            return Ok(());
        }

        match reply.body_as::<IpcFailureBody>() {
            Ok(body) => Err(body.error),
            Err(_) => Err(FabricError::operation_failed(
                "unreadable IpcFailure reply body",
            )),
        }
    }

    /// Builds the typed failure reply for the IPC channel
    #[must_use]
    pub fn create_ipc_failure_message(error: FabricError, activity_id: ActivityId) -> Message {
        let builder = Message::builder(Actor::ServiceRoutingAgent, actions::IPC_FAILURE)
            .activity_id(activity_id);

        match builder.clone().typed_body(&IpcFailureBody { error }) {
            Ok(with_body) => with_body.build(),
            Err(encode_error) => {
                error!(%encode_error, "could not encode IpcFailure body");
                builder.build()
            }
        }
    }
}

/// The activity id is never dropped across a hop: a message that arrives
/// without one gets a fresh id, and the gap is logged.
pub(crate) fn ensure_activity(message: &Message) -> ActivityId {
    message.activity_id().unwrap_or_else(|| {
        let synthesized = ActivityId::generate();
        warn!(
            message_id = ?message.message_id(),
            activity = %synthesized,
            "activity header missing, generated activity"
        );
        synthesized
    })
}
