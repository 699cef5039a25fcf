//! Message handlers for tests.

use msgpoll_core::message::{Message, TransportMessage};
use msgpoll_core::pipeline::{HandlerError, MessageContext, MessageHandler};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Error returned by [`FailingHandler`].
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct HandlerFailure(pub String);

/// Counts the messages it handled.
#[derive(Debug, Default)]
pub struct CountingHandler {
    count: AtomicUsize,
}

impl CountingHandler {
    /// Create a handler with a zero count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages handled so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl MessageHandler for CountingHandler {
    fn handle<'a>(
        &'a self,
        _message: &'a TransportMessage,
        _context: &'a MessageContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Fails with [`HandlerFailure`], always or for the first few attempts.
#[derive(Debug)]
pub struct FailingHandler {
    error: String,
    failures: Option<u32>,
    attempts: AtomicU32,
}

impl FailingHandler {
    /// Fail every attempt.
    #[must_use]
    pub fn always(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            failures: None,
            attempts: AtomicU32::new(0),
        }
    }

    /// Fail the first `failures` attempts, then succeed.
    #[must_use]
    pub fn times(failures: u32, error: impl Into<String>) -> Self {
        Self {
            failures: Some(failures),
            ..Self::always(error)
        }
    }

    /// Attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MessageHandler for FailingHandler {
    fn handle<'a>(
        &'a self,
        _message: &'a TransportMessage,
        _context: &'a MessageContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let fails = self.failures.is_none_or(|failures| attempt <= failures);
        Box::pin(async move {
            if fails {
                Err(Box::new(HandlerFailure(self.error.clone())) as HandlerError)
            } else {
                Ok(())
            }
        })
    }
}

/// Sleeps before succeeding.
#[derive(Debug)]
pub struct SlowHandler {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowHandler {
    /// Sleep for `delay` on each message.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    /// Messages received so far, finished or not.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MessageHandler for SlowHandler {
    fn handle<'a>(
        &'a self,
        _message: &'a TransportMessage,
        _context: &'a MessageContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(())
        })
    }
}

/// Publishes an event built from each handled message.
///
/// Events go through [`MessageContext::publish`], so they carry the handled
/// message's correlation.
pub struct PublishingHandler<E> {
    build: Arc<dyn Fn(&TransportMessage) -> E + Send + Sync>,
    calls: AtomicUsize,
}

impl<E: Message> PublishingHandler<E> {
    /// Publish `build(message)` for each handled message.
    #[must_use]
    pub fn new(build: impl Fn(&TransportMessage) -> E + Send + Sync + 'static) -> Self {
        Self {
            build: Arc::new(build),
            calls: AtomicUsize::new(0),
        }
    }

    /// Messages handled so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<E: Message + Clone> PublishingHandler<E> {
    /// Publish a copy of `event` for each handled message.
    #[must_use]
    pub fn publishing(event: E) -> Self {
        Self::new(move |_| event.clone())
    }
}

impl<E> std::fmt::Debug for PublishingHandler<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishingHandler")
            .field("calls", &self.calls.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<E: Message> MessageHandler for PublishingHandler<E> {
    fn handle<'a>(
        &'a self,
        message: &'a TransportMessage,
        context: &'a MessageContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let event = (self.build)(message);
        Box::pin(async move {
            context.publish(&event).await?;
            Ok(())
        })
    }
}
