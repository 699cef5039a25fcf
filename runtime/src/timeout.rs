//! Timeout-bounded polling.

use crate::error::PollingTimeoutError;
use crate::metrics::PollingMetrics;
use msgpoll_core::message::MessageId;
use msgpoll_core::poller::Poller;
use msgpoll_core::problem::ProblemDetails;
use msgpoll_core::result::{PollingResult, PollingStatus, ResultData};
use std::time::Duration;

/// Timeout used by [`PollerWithTimeout::poll_with_default`] unless configured.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Wraps any [`Poller`] and bounds `poll` by a timeout.
///
/// On expiry the wait is dropped and [`PollingTimeoutError`] is returned; the
/// wrapped poller keeps its state. `peek` and `push` never wait and are passed
/// through unchanged.
///
/// # Example
///
/// ```
/// use msgpoll_core::MessageId;
/// use msgpoll_runtime::{DefaultPoller, PollerWithTimeout};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let poller = PollerWithTimeout::new(DefaultPoller::new());
///
/// let outcome = poller
///     .poll(MessageId::new(), Duration::from_millis(10), &[])
///     .await;
/// assert!(outcome.is_err());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PollerWithTimeout<P> {
    poller: P,
    default_timeout: Duration,
}

impl<P: Poller> PollerWithTimeout<P> {
    /// Wrap `poller` with the default 30 second timeout.
    #[must_use]
    pub const fn new(poller: P) -> Self {
        Self {
            poller,
            default_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Set the timeout used by [`Self::poll_with_default`].
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The timeout used by [`Self::poll_with_default`].
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// The wrapped poller.
    #[must_use]
    pub const fn inner(&self) -> &P {
        &self.poller
    }

    /// Wait up to `timeout` for a result whose status is not excluded.
    ///
    /// # Errors
    ///
    /// Returns [`PollingTimeoutError`] if no matching result arrives in time.
    pub async fn poll(
        &self,
        message_id: MessageId,
        timeout: Duration,
        exclude_statuses: &[PollingStatus],
    ) -> Result<PollingResult, PollingTimeoutError> {
        if let Ok(result) =
            tokio::time::timeout(timeout, self.poller.poll(message_id, exclude_statuses)).await
        {
            Ok(result)
        } else {
            PollingMetrics::record_timeout();
            tracing::debug!(
                message_id = %message_id,
                timeout_ms = timeout.as_millis(),
                "Poll timed out"
            );
            Err(PollingTimeoutError {
                message_id,
                timeout,
            })
        }
    }

    /// [`Self::poll`] with the configured default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PollingTimeoutError`] if no matching result arrives in time.
    pub async fn poll_with_default(
        &self,
        message_id: MessageId,
        exclude_statuses: &[PollingStatus],
    ) -> Result<PollingResult, PollingTimeoutError> {
        self.poll(message_id, self.default_timeout, exclude_statuses).await
    }

    /// Current result, without waiting.
    pub async fn peek(
        &self,
        message_id: MessageId,
        exclude_statuses: &[PollingStatus],
    ) -> Option<PollingResult> {
        self.poller.peek(message_id, exclude_statuses).await
    }

    /// Store a result in the wrapped poller.
    pub async fn push(
        &self,
        message_id: MessageId,
        status: PollingStatus,
        data: Option<ResultData>,
        problem: Option<ProblemDetails>,
    ) {
        self.poller.push(message_id, status, data, problem).await;
    }
}
