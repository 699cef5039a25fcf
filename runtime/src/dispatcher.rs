//! Completion dispatcher.
//!
//! Translates pipeline lifecycle signals into poller updates:
//!
//! - a message completed: push `succeeded` for it and, if configured, publish a
//!   [`MessageCompletedEvent`] naming it
//! - a correlated event arrived: push the status its registration declares, for the
//!   message it reports on
//!
//! Event types without a registration are ignored.

use crate::config::PollingConfig;
use crate::metrics::DispatchMetrics;
use msgpoll_core::message::{
    Message, MessageCompletedEvent, MessageHeaders, MessageId, TransportMessage,
};
use msgpoll_core::pipeline::{
    CompletionListener, HandlerError, MessageBus, MessageContext, MessageHandler,
};
use msgpoll_core::result::PollingStatus;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Pushes results for completed messages and correlated events.
///
/// Registered as a [`CompletionListener`] and as the [`MessageHandler`] of every
/// correlated event type; see [`PollingPlugin`](crate::PollingPlugin).
pub struct CompletionDispatcher {
    config: Arc<PollingConfig>,
    bus: Arc<dyn MessageBus>,
}

impl CompletionDispatcher {
    /// Create a dispatcher publishing completion notifications on `bus`.
    #[must_use]
    pub fn new(config: Arc<PollingConfig>, bus: Arc<dyn MessageBus>) -> Self {
        Self { config, bus }
    }

    /// The configuration this dispatcher applies.
    #[must_use]
    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Record that `message` was handled successfully.
    ///
    /// Does nothing for excluded message types.
    pub async fn complete(&self, message: &TransportMessage) {
        if self.config.is_excluded_from_completion_events(&message.message_type) {
            tracing::trace!(
                message_id = %message.message_id(),
                message_type = %message.message_type,
                "Completion excluded"
            );
            return;
        }

        let message_id = message.message_id();

        if self.config.auto_publish_completion_events() {
            self.publish_completed(message_id).await;
        }

        self.config
            .poller()
            .push(message_id, PollingStatus::Succeeded, None, None)
            .await;
        tracing::debug!(
            message_id = %message_id,
            message_type = %message.message_type,
            "Message completed"
        );
    }

    async fn publish_completed(&self, message_id: MessageId) {
        let headers = MessageHeaders::new(MessageId::new()).with_correlation_id(message_id);
        let event = MessageCompletedEvent {
            completed_message_id: message_id,
        };

        let published = match TransportMessage::from_message(&event, headers) {
            Ok(transport) => self.bus.publish(transport).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match published {
            Ok(()) => DispatchMetrics::record_completion_published(),
            Err(error) => {
                // The direct push below still records the completion.
                DispatchMetrics::record_completion_publish_error();
                tracing::warn!(
                    message_id = %message_id,
                    error = %error,
                    "Failed to publish {}",
                    MessageCompletedEvent::MESSAGE_TYPE
                );
            }
        }
    }

    /// Push the result a correlated event reports.
    ///
    /// Unregistered event types and events that cannot be tied to a message are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the event body cannot be decoded as its registered type.
    pub async fn correlate(&self, event: &TransportMessage) -> Result<(), HandlerError> {
        let Some(entry) = self.config.correlations().get(&event.message_type) else {
            tracing::trace!(message_type = %event.message_type, "No correlation registered");
            return Ok(());
        };

        let Some(result) = entry.resolve(event)? else {
            tracing::warn!(
                event_id = %event.message_id(),
                message_type = %event.message_type,
                "Event has no correlation id, cannot correlate it to a message"
            );
            return Ok(());
        };

        tracing::debug!(
            message_id = %result.message_id,
            status = %result.status,
            message_type = %event.message_type,
            "Correlated event"
        );
        DispatchMetrics::record_correlated(result.status);
        self.config
            .poller()
            .push(
                result.message_id,
                result.status,
                result.data,
                result.problem,
            )
            .await;
        Ok(())
    }
}

impl std::fmt::Debug for CompletionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CompletionListener for CompletionDispatcher {
    fn on_message_completed<'a>(
        &'a self,
        message: &'a TransportMessage,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.complete(message))
    }
}

impl MessageHandler for CompletionDispatcher {
    fn handle<'a>(
        &'a self,
        message: &'a TransportMessage,
        _context: &'a MessageContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        Box::pin(self.correlate(message))
    }
}
