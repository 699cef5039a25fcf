//! In-memory [`Poller`].
//!
//! Holds the latest result per message id and one [`Signal`] per id that has
//! waiters.
//!
//! # Waiting
//!
//! ```text
//! poll(id) ──▶ lock ──▶ result matches filter? ──yes──▶ return it
//!                              │ no
//!                              ▼
//!              take signal for id (fresh if none or spent), listen
//!                              │
//!                    unlock, wait for fire
//!                              │
//!                              └──────────▶ back to lock
//!
//! push(id) ──▶ lock ──▶ replace result ──▶ fire signal for id (if any)
//! ```
//!
//! The record check and the listen happen under one lock, and `push` stores and
//! fires under the same lock, so a push can never land between a waiter's check
//! and its listen. Waiters of one id always share the current signal, so a single
//! push releases all of them; waiters whose filter still excludes the new result
//! replace the spent signal and wait again. An id's signal is removed once its
//! last listener detaches, whether that waiter was woken or cancelled.
//!
//! Results are never evicted here; retention belongs to the deployment around it.

use crate::metrics::PollingMetrics;
use crate::signal::{Listener, Signal};
use msgpoll_core::message::MessageId;
use msgpoll_core::poller::Poller;
use msgpoll_core::problem::ProblemDetails;
use msgpoll_core::result::{PollingResult, PollingStatus, ResultData};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// In-memory implementation of [`Poller`].
///
/// Suitable for single-process deployments and tests. Cloning is cheap and every
/// clone shares the same results.
///
/// # Example
///
/// ```
/// use msgpoll_core::{MessageId, Poller, PollingStatus};
/// use msgpoll_runtime::DefaultPoller;
///
/// # #[tokio::main]
/// # async fn main() {
/// let poller = DefaultPoller::new();
/// let message_id = MessageId::new();
///
/// let waiter = tokio::spawn({
///     let poller = poller.clone();
///     async move { poller.poll(message_id, &[]).await }
/// });
///
/// poller.push(message_id, PollingStatus::Succeeded, None, None).await;
///
/// let result = waiter.await.expect("waiter task");
/// assert!(result.is_success());
/// # }
/// ```
#[derive(Clone, Default)]
pub struct DefaultPoller {
    state: Arc<Mutex<PollerState>>,
}

#[derive(Default)]
struct PollerState {
    results: HashMap<MessageId, PollingResult>,
    signals: HashMap<MessageId, Signal>,
}

enum Lookup {
    Ready(PollingResult),
    Wait(Waiter),
}

/// A listener on one id's signal.
///
/// Fields drop in order: the listener detaches before the release runs.
struct Waiter {
    listener: Listener,
    _release: Release,
}

/// Removes the signal for `message_id` if nobody listens to it anymore.
struct Release {
    state: Arc<Mutex<PollerState>>,
    message_id: MessageId,
}

impl Drop for Release {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        if state
            .signals
            .get(&self.message_id)
            .is_some_and(|signal| signal.listener_count() == 0)
        {
            state.signals.remove(&self.message_id);
        }
    }
}

fn lock_state(state: &Mutex<PollerState>) -> MutexGuard<'_, PollerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DefaultPoller {
    /// Create an empty poller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PollerState> {
        lock_state(&self.state)
    }

    /// Return the matching result, or start listening for the next push.
    fn lookup_or_listen(
        &self,
        message_id: MessageId,
        exclude_statuses: &[PollingStatus],
    ) -> Lookup {
        let mut state = self.lock();

        if let Some(result) = state.results.get(&message_id) {
            if !result.has_status_in(exclude_statuses) {
                return Lookup::Ready(result.clone());
            }
        }

        let signal = state.signals.entry(message_id).or_insert_with(Signal::new);
        if signal.is_fired() {
            *signal = Signal::new();
        }
        Lookup::Wait(Waiter {
            listener: signal.listen(),
            _release: Release {
                state: Arc::clone(&self.state),
                message_id,
            },
        })
    }

    /// Current result, ignoring any filter.
    fn current(&self, message_id: MessageId) -> Option<PollingResult> {
        self.lock().results.get(&message_id).cloned()
    }

    /// Wait for a result for `message_id` whose status is not excluded.
    pub async fn wait_for(
        &self,
        message_id: MessageId,
        exclude_statuses: &[PollingStatus],
    ) -> PollingResult {
        PollingMetrics::record_poll();
        let started = Instant::now();
        let mut waited = false;

        loop {
            match self.lookup_or_listen(message_id, exclude_statuses) {
                Lookup::Ready(result) => {
                    if waited {
                        PollingMetrics::record_wait(started.elapsed());
                    }
                    return result;
                }
                Lookup::Wait(mut waiter) => {
                    if waited {
                        PollingMetrics::record_rearm();
                    }
                    tracing::trace!(message_id = %message_id, "Waiting for result");
                    waiter.listener.fired().await;
                    waited = true;
                }
            }
        }
    }

    /// Current result for `message_id` unless its status is excluded.
    #[must_use]
    pub fn get(
        &self,
        message_id: MessageId,
        exclude_statuses: &[PollingStatus],
    ) -> Option<PollingResult> {
        self.current(message_id)
            .filter(|result| !result.has_status_in(exclude_statuses))
    }

    /// Replace the result for `message_id` and wake its waiters.
    pub fn store(
        &self,
        message_id: MessageId,
        status: PollingStatus,
        data: Option<ResultData>,
        problem: Option<ProblemDetails>,
    ) {
        let stored_results = {
            let mut state = self.lock();
            let result = PollingResult::new(message_id, status, data, problem);
            state.results.insert(message_id, result);
            if let Some(signal) = state.signals.get(&message_id) {
                signal.fire();
            }
            state.results.len()
        };

        PollingMetrics::record_push(status, stored_results);
        tracing::debug!(message_id = %message_id, status = %status, "Result pushed");
    }

    /// Number of stored results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().results.len()
    }

    /// Whether no result has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().results.is_empty()
    }

    /// Message ids that currently have at least one waiting poll.
    #[must_use]
    pub fn waiting_keys(&self) -> Vec<MessageId> {
        self.lock()
            .signals
            .iter()
            .filter(|(_, signal)| !signal.is_fired() && signal.listener_count() > 0)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl std::fmt::Debug for DefaultPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DefaultPoller")
            .field("results", &state.results.len())
            .field("signals", &state.signals.len())
            .finish()
    }
}

impl Poller for DefaultPoller {
    fn poll<'a>(
        &'a self,
        message_id: MessageId,
        exclude_statuses: &'a [PollingStatus],
    ) -> Pin<Box<dyn Future<Output = PollingResult> + Send + 'a>> {
        Box::pin(self.wait_for(message_id, exclude_statuses))
    }

    fn peek<'a>(
        &'a self,
        message_id: MessageId,
        exclude_statuses: &'a [PollingStatus],
    ) -> Pin<Box<dyn Future<Output = Option<PollingResult>> + Send + 'a>> {
        let result = self.get(message_id, exclude_statuses);
        Box::pin(async move { result })
    }

    fn push(
        &self,
        message_id: MessageId,
        status: PollingStatus,
        data: Option<ResultData>,
        problem: Option<ProblemDetails>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.store(message_id, status, data, problem);
        Box::pin(async {})
    }
}
