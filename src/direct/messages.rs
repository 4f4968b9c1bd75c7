//! Header save/restore rules for the direct messaging hop
//!
//! Direct messaging replaces the caller's logical (actor, action) with the
//! fixed transport pair (`DirectMessagingAgent`, `DirectMessaging`) and
//! stashes the originals in a [`DirectMessagingHeader`]; the receiving agent
//! restores them before dispatch. The target replica's filter rides along so
//! the agent can pick the right handler among co-hosted replicas.

use tracing::{error, warn};

use crate::domain_types::ActivityId;
use crate::error::FabricError;
use crate::location::ServiceLocation;
use crate::message::{
    Actor, DirectMessagingFailureBody, DirectMessagingHeader, Message, actions,
};
use crate::routing::messages::ensure_activity;

/// Wrap/unwrap operations of the direct messaging path
pub struct DirectMessagingMessage;

impl DirectMessagingMessage {
    /// Wraps a request for the direct hop to `primary_location`, stashing
    /// the message's own (actor, action) and attaching the replica filter
    #[must_use]
    pub fn wrap_service_request(message: Message, primary_location: &ServiceLocation) -> Message {
        let actor = message.actor();
        let action = message.action().to_string();

        message
            .into_builder()
            .maybe_direct_header(Some(DirectMessagingHeader { actor, action }))
            .actor(Actor::DirectMessagingAgent)
            .action(actions::DIRECT_MESSAGING)
            .filter(primary_location.filter_header())
            .build()
    }

    /// Strips the direct wrapper, restoring the logical (actor, action).
    /// Fails with `InvalidMessage` when the wrapper is missing.
    pub fn unwrap_from_transport(message: Message) -> Result<Message, FabricError> {
        let Some(direct_header) = message.direct_header().cloned() else {
            warn!(
                message_id = ?message.message_id(),
                "direct messaging header missing"
            );
            return Err(FabricError::InvalidMessage);
        };

        let activity_id = ensure_activity(&message);

        Ok(message
            .into_builder()
            .actor(direct_header.actor)
            .action(direct_header.action)
            .activity_id(activity_id)
            .maybe_direct_header(None)
            .build())
    }

    /// Checks a direct reply for the failure action; a failure reply yields
    /// the typed error it carries
    pub fn unwrap_service_reply(reply: &Message) -> Result<(), FabricError> {
        if reply.action() != actions::DIRECT_MESSAGING_FAILURE {
            return Ok(());
        }

        match reply.body_as::<DirectMessagingFailureBody>() {
            Ok(body) => Err(body.error),
            Err(_) => Err(FabricError::operation_failed(
                "unreadable DirectMessagingFailure reply body",
            )),
        }
    }

    /// Builds the typed failure reply for the direct channel
    #[must_use]
    pub fn create_failure_message(error: FabricError, activity_id: ActivityId) -> Message {
        let builder = Message::builder(
            Actor::DirectMessagingAgent,
            actions::DIRECT_MESSAGING_FAILURE,
        )
        .activity_id(activity_id);

        match builder
            .clone()
            .typed_body(&DirectMessagingFailureBody { error })
        {
            Ok(with_body) => with_body.build(),
            Err(encode_error) => {
                error!(%encode_error, "could not encode DirectMessagingFailure body");
                builder.build()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{NodeInstance, PartitionId, ReplicaId, ReplicaInstance};

    fn replica_location() -> ServiceLocation {
        ServiceLocation::create(
            NodeInstance::new("nodeA", 17),
            PartitionId::generate(),
            ReplicaId::new(42),
            ReplicaInstance::new(7),
            "10.0.0.1:1234",
        )
        .unwrap()
    }

    #[test]
    fn test_wrap_round_trip() {
        let location = replica_location();
        let activity = ActivityId::generate();
        let request = Message::builder(Actor::FileStoreService, "UploadChunk")
            .activity_id(activity)
            .build();

        let wrapped = DirectMessagingMessage::wrap_service_request(request, &location);
        assert_eq!(wrapped.actor(), Actor::DirectMessagingAgent);
        assert_eq!(wrapped.action(), actions::DIRECT_MESSAGING);
        assert_eq!(wrapped.filter(), Some(&location.filter_header()));

        let unwrapped = DirectMessagingMessage::unwrap_from_transport(wrapped).unwrap();
        assert_eq!(unwrapped.actor(), Actor::FileStoreService);
        assert_eq!(unwrapped.action(), "UploadChunk");
        assert_eq!(unwrapped.activity_id(), Some(activity));
        // The filter survives the unwrap on the direct path.
        assert_eq!(unwrapped.filter(), Some(&location.filter_header()));
    }

    #[test]
    fn test_unwrap_without_wrapper_is_invalid() {
        let bare = Message::builder(Actor::FileStoreService, "UploadChunk").build();
        let error = DirectMessagingMessage::unwrap_from_transport(bare).unwrap_err();
        assert_eq!(error, FabricError::InvalidMessage);
    }

    #[test]
    fn test_unwrap_synthesizes_missing_activity() {
        let request = Message::builder(Actor::FileStoreService, "UploadChunk").build();
        let wrapped = DirectMessagingMessage::wrap_service_request(request, &replica_location());

        let unwrapped = DirectMessagingMessage::unwrap_from_transport(wrapped).unwrap();
        assert!(unwrapped.activity_id().is_some());
    }

    #[test]
    fn test_unwrap_service_reply_extracts_failure() {
        let failure = DirectMessagingMessage::create_failure_message(
            FabricError::MessageHandlerDoesNotExist,
            ActivityId::generate(),
        );

        let error = DirectMessagingMessage::unwrap_service_reply(&failure).unwrap_err();
        assert_eq!(error, FabricError::MessageHandlerDoesNotExist);
    }

    #[test]
    fn test_unwrap_service_reply_passes_ordinary_replies() {
        let reply = Message::builder(Actor::FileStoreService, "UploadChunkReply").build();
        assert!(DirectMessagingMessage::unwrap_service_reply(&reply).is_ok());
    }
}
