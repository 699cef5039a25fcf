//! Capability contract of the message pipeline.
//!
//! The polling engine does not own message dispatch, retries or transport. It relies
//! on a pipeline that offers:
//!
//! - publishing to the bus ([`MessageBus`]),
//! - handler registration per message type ([`Pipeline::register_handler`]),
//! - message headers with a message id and a correlation id
//!   ([`MessageHeaders`](crate::message::MessageHeaders)),
//! - a notification after a message was handled successfully ([`CompletionListener`]),
//! - a terminal-failure hook invoked once per message that exhausted its retries
//!   ([`ErrorHandler`]).
//!
//! # Flow
//!
//! ```text
//! ┌──────────────┐   handle    ┌──────────────┐
//! │ Inbound msg  │────────────▶│   Handlers   │
//! └──────────────┘             └──────┬───────┘
//!                          ok         │        err (retries exhausted)
//!                    ┌────────────────┴────────────────┐
//!                    ▼                                 ▼
//!          ┌───────────────────┐             ┌──────────────────┐
//!          │CompletionListener │             │   ErrorHandler   │
//!          └───────────────────┘             └──────────────────┘
//! ```
//!
//! # Dyn Compatibility
//!
//! Every trait here returns `Pin<Box<dyn Future>>` instead of using `async fn` so
//! implementations can be shared as `Arc<dyn Trait>`.

use crate::message::{Message, MessageError, MessageHeaders, MessageId, TransportMessage};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Error produced by a message handler.
///
/// This is the "exception" handed to the terminal-failure hook.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while publishing to the bus.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// The bus refused or failed to accept the message
    #[error("Publish failed for message type '{message_type}': {reason}")]
    PublishFailed {
        /// Type token of the message
        message_type: String,
        /// The reason for failure
        reason: String,
    },

    /// The bus is no longer accepting messages
    #[error("Message bus closed")]
    Closed,

    /// The message could not be serialized
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<MessageError> for BusError {
    fn from(err: MessageError) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Publishes messages to every local subscriber of their type.
///
/// Delivery is fire-and-forget: `publish` returns once the bus has accepted the
/// message, not once handlers have run.
pub trait MessageBus: Send + Sync {
    /// Publish a message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] or [`BusError::Closed`] if the bus cannot
    /// accept the message.
    fn publish(
        &self,
        message: TransportMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;
}

/// Context of the message currently being handled.
///
/// Messages published through the context carry a fresh message id and inherit
/// the inbound message's effective correlation id, which is what correlation
/// rules default to when mapping an event back to the message that caused it.
#[derive(Clone)]
pub struct MessageContext {
    headers: MessageHeaders,
    bus: Arc<dyn MessageBus>,
}

impl MessageContext {
    /// Create a context for the inbound message with the given headers.
    #[must_use]
    pub fn new(headers: MessageHeaders, bus: Arc<dyn MessageBus>) -> Self {
        Self { headers, bus }
    }

    /// Headers of the inbound message.
    #[must_use]
    pub const fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Identifier of the inbound message.
    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.headers.message_id
    }

    /// The bus this message arrived on.
    #[must_use]
    pub fn bus(&self) -> Arc<dyn MessageBus> {
        Arc::clone(&self.bus)
    }

    /// Publish a message caused by the inbound one.
    ///
    /// Returns the id assigned to the published message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Serialization`] if the message cannot be serialized, or
    /// the bus's error if it refuses the message.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<MessageId, BusError> {
        let headers = MessageHeaders::new(MessageId::new())
            .with_correlation_id(self.headers.effective_correlation_id());
        let message_id = headers.message_id;
        let transport = TransportMessage::from_message(message, headers)?;
        self.bus.publish(transport).await?;
        Ok(message_id)
    }
}

impl std::fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Handles messages of the types it is registered for.
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Any error makes the pipeline retry the message; after the last attempt the
    /// message is handed to the [`ErrorHandler`].
    fn handle<'a>(
        &'a self,
        message: &'a TransportMessage,
        context: &'a MessageContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;
}

/// Notified once after every handler of an inbound message succeeded.
pub trait CompletionListener: Send + Sync {
    /// Called with the message that completed.
    fn on_message_completed<'a>(
        &'a self,
        message: &'a TransportMessage,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Terminal-failure hook for messages that exhausted their retries.
pub trait ErrorHandler: Send + Sync {
    /// Handle a message that cannot be processed (e.g. move it to a dead-letter queue).
    fn handle_poison_message<'a>(
        &'a self,
        message: &'a TransportMessage,
        error: &'a (dyn std::error::Error + Send + Sync + 'static),
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Decorates the pipeline's current error handler.
pub type ErrorHandlerDecorator<'a> =
    Box<dyn FnOnce(Arc<dyn ErrorHandler>) -> Arc<dyn ErrorHandler> + 'a>;

/// Registration surface of a pipeline, used by plugins during startup.
pub trait Pipeline {
    /// The bus messages are published on.
    fn bus(&self) -> Arc<dyn MessageBus>;

    /// Register a handler for a message type token.
    ///
    /// Several handlers may be registered for the same type; all of them run.
    fn register_handler(&mut self, message_type: &str, handler: Arc<dyn MessageHandler>);

    /// Add a listener notified after each successfully handled message.
    fn add_completion_listener(&mut self, listener: Arc<dyn CompletionListener>);

    /// Replace the terminal-failure handler with a decoration of the current one.
    fn wrap_error_handler(&mut self, decorate: ErrorHandlerDecorator<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct SeatsReserved {
        seats: u32,
    }

    impl Message for SeatsReserved {
        const MESSAGE_TYPE: &'static str = "SeatsReserved.v1";
    }

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<TransportMessage>>,
    }

    impl MessageBus for RecordingBus {
        fn publish(
            &self,
            message: TransportMessage,
        ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
            Box::pin(async move {
                self.published
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(message);
                Ok(())
            })
        }
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_publish_from_context_inherits_correlation() {
        let bus = Arc::new(RecordingBus::default());
        let inbound = MessageHeaders::new(MessageId::new());
        let context = MessageContext::new(inbound.clone(), bus.clone());

        let published_id = context.publish(&SeatsReserved { seats: 2 }).await.unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].headers.message_id, published_id);
        assert_ne!(published_id, inbound.message_id);
        assert_eq!(
            published[0].headers.correlation_id,
            Some(inbound.message_id)
        );
        assert!(published[0].is::<SeatsReserved>());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_correlation_is_carried_through_chains() {
        let bus = Arc::new(RecordingBus::default());
        let origin = MessageId::new();
        let inbound = MessageHeaders::new(MessageId::new()).with_correlation_id(origin);
        let context = MessageContext::new(inbound, bus.clone());

        context.publish(&SeatsReserved { seats: 1 }).await.unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published[0].headers.correlation_id, Some(origin));
    }
}
