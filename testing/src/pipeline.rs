//! In-memory message pipeline.
//!
//! A single-process implementation of [`Pipeline`] for tests and demos:
//!
//! - handlers are registered per message type token, several per type
//! - published messages go through an unbounded channel to a worker task, which
//!   processes each message on its own task
//! - a message whose handlers fail is retried, up to `max_attempts` in total
//! - after a success, completion listeners run in registration order
//! - after the last failed attempt, the error handler receives the message
//!
//! Messages without handlers are dropped.

use chrono::{DateTime, Utc};
use msgpoll_core::message::{Message, MessageHeaders, MessageId, TransportMessage};
use msgpoll_core::pipeline::{
    BusError, CompletionListener, ErrorHandler, ErrorHandlerDecorator, HandlerError, MessageBus,
    MessageContext, MessageHandler, Pipeline,
};
use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default number of attempts per message.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Bus feeding the in-memory pipeline.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    sender: mpsc::UnboundedSender<TransportMessage>,
}

impl MessageBus for InMemoryBus {
    fn publish(
        &self,
        message: TransportMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let sent = self.sender.send(message).map_err(|_| BusError::Closed);
        Box::pin(async move { sent })
    }
}

/// A message that exhausted its attempts.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The message
    pub message: TransportMessage,
    /// Text of the last error
    pub error: String,
    /// When the message was given up on
    pub failed_at: DateTime<Utc>,
}

/// Default terminal-failure handler: keeps dead letters in memory.
#[derive(Debug, Default)]
pub struct RecordingErrorHandler {
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl RecordingErrorHandler {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dead letters received so far.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of dead letters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no message was given up on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorHandler for RecordingErrorHandler {
    fn handle_poison_message<'a>(
        &'a self,
        message: &'a TransportMessage,
        error: &'a (dyn Error + Send + Sync + 'static),
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DeadLetter {
                message: message.clone(),
                error: error.to_string(),
                failed_at: Utc::now(),
            });
        Box::pin(async {})
    }
}

/// Pipeline under construction.
///
/// Register handlers and plugins, then [`start`](Self::start) it.
///
/// # Example
///
/// ```ignore
/// let mut pipeline = InMemoryPipeline::new().with_max_attempts(3);
/// pipeline.register_handler(StartImport::MESSAGE_TYPE, Arc::new(ImportHandler));
/// PollingConfig::builder(poller.clone()).build()?.plugin().install(&mut pipeline);
///
/// let running = pipeline.start();
/// let message_id = running.send(&StartImport { .. }).await?;
/// ```
pub struct InMemoryPipeline {
    bus: Arc<InMemoryBus>,
    receiver: mpsc::UnboundedReceiver<TransportMessage>,
    handlers: HashMap<String, Vec<Arc<dyn MessageHandler>>>,
    listeners: Vec<Arc<dyn CompletionListener>>,
    dead_letters: Arc<RecordingErrorHandler>,
    error_handler: Arc<dyn ErrorHandler>,
    max_attempts: u32,
}

impl InMemoryPipeline {
    /// Create a pipeline with no handlers and [`DEFAULT_MAX_ATTEMPTS`].
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let dead_letters = Arc::new(RecordingErrorHandler::new());
        Self {
            bus: Arc::new(InMemoryBus { sender }),
            receiver,
            handlers: HashMap::new(),
            listeners: Vec::new(),
            error_handler: dead_letters.clone(),
            dead_letters,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the number of attempts per message (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Number of attempts per message.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Start the worker task.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn start(self) -> RunningPipeline {
        let dispatch = Arc::new(Dispatch {
            bus: self.bus.clone(),
            handlers: self.handlers,
            listeners: self.listeners,
            error_handler: self.error_handler,
            max_attempts: self.max_attempts,
        });

        tracing::debug!(
            message_types = dispatch.handlers.len(),
            listeners = dispatch.listeners.len(),
            max_attempts = dispatch.max_attempts,
            "In-memory pipeline started"
        );

        let mut receiver = self.receiver;
        let worker = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let dispatch = Arc::clone(&dispatch);
                tokio::spawn(async move { dispatch.process(message).await });
            }
        });

        RunningPipeline {
            bus: self.bus,
            dead_letters: self.dead_letters,
            worker,
        }
    }
}

impl Default for InMemoryPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline for InMemoryPipeline {
    fn bus(&self) -> Arc<dyn MessageBus> {
        self.bus.clone()
    }

    fn register_handler(&mut self, message_type: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .entry(message_type.to_string())
            .or_default()
            .push(handler);
    }

    fn add_completion_listener(&mut self, listener: Arc<dyn CompletionListener>) {
        self.listeners.push(listener);
    }

    fn wrap_error_handler(&mut self, decorate: ErrorHandlerDecorator<'_>) {
        self.error_handler = decorate(Arc::clone(&self.error_handler));
    }
}

impl std::fmt::Debug for InMemoryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPipeline")
            .field("message_types", &self.handlers.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.len())
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Frozen registrations shared by message tasks.
struct Dispatch {
    bus: Arc<InMemoryBus>,
    handlers: HashMap<String, Vec<Arc<dyn MessageHandler>>>,
    listeners: Vec<Arc<dyn CompletionListener>>,
    error_handler: Arc<dyn ErrorHandler>,
    max_attempts: u32,
}

impl Dispatch {
    async fn run_handlers(
        handlers: &[Arc<dyn MessageHandler>],
        message: &TransportMessage,
        context: &MessageContext,
    ) -> Result<(), HandlerError> {
        for handler in handlers {
            handler.handle(message, context).await?;
        }
        Ok(())
    }

    async fn process(&self, message: TransportMessage) {
        let Some(handlers) = self.handlers.get(&message.message_type) else {
            tracing::debug!(
                message_id = %message.message_id(),
                message_type = %message.message_type,
                "No handlers registered, dropping message"
            );
            return;
        };

        let context = MessageContext::new(message.headers.clone(), self.bus.clone());
        let mut attempt = 1;
        loop {
            match Self::run_handlers(handlers, &message, &context).await {
                Ok(()) => {
                    for listener in &self.listeners {
                        listener.on_message_completed(&message).await;
                    }
                    return;
                }
                Err(error) if attempt < self.max_attempts => {
                    tracing::debug!(
                        message_id = %message.message_id(),
                        attempt,
                        error = %error,
                        "Handler failed, retrying"
                    );
                    attempt += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        message_id = %message.message_id(),
                        message_type = %message.message_type,
                        attempts = attempt,
                        error = %error,
                        "Message exhausted its attempts"
                    );
                    self.error_handler
                        .handle_poison_message(&message, &*error)
                        .await;
                    return;
                }
            }
        }
    }
}

/// A started pipeline.
///
/// Dropping it stops the worker; messages already being processed run to the end.
#[derive(Debug)]
pub struct RunningPipeline {
    bus: Arc<InMemoryBus>,
    dead_letters: Arc<RecordingErrorHandler>,
    worker: JoinHandle<()>,
}

impl RunningPipeline {
    /// Send a message that starts a new conversation.
    ///
    /// Returns the id assigned to the message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the message cannot be serialized or the pipeline stopped.
    pub async fn send<M: Message>(&self, message: &M) -> Result<MessageId, BusError> {
        self.send_with_headers(message, MessageHeaders::new(MessageId::new())).await
    }

    /// Send a message with explicit headers (e.g. a chosen id or correlation id).
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the message cannot be serialized or the pipeline stopped.
    pub async fn send_with_headers<M: Message>(
        &self,
        message: &M,
        headers: MessageHeaders,
    ) -> Result<MessageId, BusError> {
        let message_id = headers.message_id;
        let transport = TransportMessage::from_message(message, headers)?;
        self.bus.publish(transport).await?;
        Ok(message_id)
    }

    /// The bus feeding this pipeline.
    #[must_use]
    pub fn bus(&self) -> Arc<dyn MessageBus> {
        self.bus.clone()
    }

    /// Messages handed to the built-in dead-letter recorder.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.dead_letters()
    }

    /// Stop accepting messages and wait for the worker to exit.
    pub async fn shutdown(mut self) {
        self.worker.abort();
        let _ = (&mut self.worker).await;
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::handlers::{CountingHandler, FailingHandler};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping;

    impl Message for Ping {
        const MESSAGE_TYPE: &'static str = "Ping.v1";
    }

    struct CompletedIds(Mutex<Vec<MessageId>>);

    impl CompletionListener for CompletedIds {
        fn on_message_completed<'a>(
            &'a self,
            message: &'a TransportMessage,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            self.0.lock().unwrap().push(message.message_id());
            Box::pin(async {})
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_delivers_to_every_handler_and_notifies_listeners() {
        let first = Arc::new(CountingHandler::new());
        let second = Arc::new(CountingHandler::new());
        let completed = Arc::new(CompletedIds(Mutex::new(Vec::new())));

        let mut pipeline = InMemoryPipeline::new();
        pipeline.register_handler(Ping::MESSAGE_TYPE, first.clone());
        pipeline.register_handler(Ping::MESSAGE_TYPE, second.clone());
        pipeline.add_completion_listener(completed.clone());
        let running = pipeline.start();

        let id = running.send(&Ping).await.unwrap();
        settle().await;

        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
        assert_eq!(*completed.0.lock().unwrap(), vec![id]);
        assert!(running.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_retries_then_dead_letters() {
        let failing = Arc::new(FailingHandler::always("boom"));
        let completed = Arc::new(CompletedIds(Mutex::new(Vec::new())));

        let mut pipeline = InMemoryPipeline::new().with_max_attempts(3);
        pipeline.register_handler(Ping::MESSAGE_TYPE, failing.clone());
        pipeline.add_completion_listener(completed.clone());
        let running = pipeline.start();

        let id = running.send(&Ping).await.unwrap();
        settle().await;

        assert_eq!(failing.attempts(), 3);
        assert!(completed.0.lock().unwrap().is_empty());
        let dead_letters = running.dead_letters();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].message.message_id(), id);
        assert_eq!(dead_letters[0].error, "boom");
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_attempts() {
        let flaky = Arc::new(FailingHandler::times(2, "flaky"));

        let mut pipeline = InMemoryPipeline::new();
        pipeline.register_handler(Ping::MESSAGE_TYPE, flaky.clone());
        let running = pipeline.start();

        running.send(&Ping).await.unwrap();
        settle().await;

        assert_eq!(flaky.attempts(), 3);
        assert!(running.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_wrapped_error_handler_sees_failures() {
        struct Counting {
            inner: Arc<dyn ErrorHandler>,
            calls: Arc<Mutex<u32>>,
        }

        impl ErrorHandler for Counting {
            fn handle_poison_message<'a>(
                &'a self,
                message: &'a TransportMessage,
                error: &'a (dyn Error + Send + Sync + 'static),
            ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
                *self.calls.lock().unwrap() += 1;
                self.inner.handle_poison_message(message, error)
            }
        }

        let calls = Arc::new(Mutex::new(0));
        let mut pipeline = InMemoryPipeline::new().with_max_attempts(1);
        pipeline.register_handler(
            Ping::MESSAGE_TYPE,
            Arc::new(FailingHandler::always("nope")),
        );
        let counted = calls.clone();
        pipeline.wrap_error_handler(Box::new(move |inner| {
            Arc::new(Counting {
                inner,
                calls: counted,
            }) as Arc<dyn ErrorHandler>
        }));
        let running = pipeline.start();

        running.send(&Ping).await.unwrap();
        settle().await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(running.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_unhandled_message_is_dropped() {
        let completed = Arc::new(CompletedIds(Mutex::new(Vec::new())));
        let mut pipeline = InMemoryPipeline::new();
        pipeline.add_completion_listener(completed.clone());
        let running = pipeline.start();

        running.send(&Ping).await.unwrap();
        settle().await;

        assert!(completed.0.lock().unwrap().is_empty());
        assert!(running.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let pipeline = InMemoryPipeline::new();
        let bus = pipeline.bus();
        pipeline.start().shutdown().await;

        let headers = MessageHeaders::new(MessageId::new());
        let transport = TransportMessage::from_message(&Ping, headers).unwrap();
        assert!(matches!(bus.publish(transport).await, Err(BusError::Closed)));
    }
}
