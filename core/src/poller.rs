//! The [`Poller`] trait: where message outcomes are stored and awaited.
//!
//! Producers (the pipeline side) call [`Poller::push`]; consumers (an HTTP handler
//! waiting on a job, a CLI, a test) call [`Poller::poll`] or [`Poller::peek`] with the
//! message id they got when sending.
//!
//! # Example
//!
//! ```rust,ignore
//! let message_id = bus.send(PlaceOrder { .. }).await?;
//!
//! // Wait for anything past "accepted"
//! let result = poller.poll(message_id, &[PollingStatus::Accepted]).await;
//! if result.is_success() {
//!     respond_ok(result.data)
//! } else {
//!     respond_problem(result.problem)
//! }
//! ```

use crate::message::MessageId;
use crate::problem::ProblemDetails;
use crate::result::{PollingResult, PollingStatus, ResultData};
use std::future::Future;
use std::pin::Pin;

/// Stores message outcomes and lets callers wait for them.
///
/// Implementations keep at most one result per message id; a push replaces the
/// previous result. The in-memory implementation serves a single process; a
/// distributed implementation can back several server instances with the same
/// contract.
pub trait Poller: Send + Sync {
    /// Wait until a result whose status is not in `exclude_statuses` exists for
    /// `message_id`, and return it.
    ///
    /// Returns immediately if such a result already exists. Never returns a result
    /// whose status is excluded.
    fn poll<'a>(
        &'a self,
        message_id: MessageId,
        exclude_statuses: &'a [PollingStatus],
    ) -> Pin<Box<dyn Future<Output = PollingResult> + Send + 'a>>;

    /// Return the current result without waiting.
    ///
    /// Returns `None` when no result exists or its status is in `exclude_statuses`.
    fn peek<'a>(
        &'a self,
        message_id: MessageId,
        exclude_statuses: &'a [PollingStatus],
    ) -> Pin<Box<dyn Future<Output = Option<PollingResult>> + Send + 'a>>;

    /// Store the result for `message_id`, replacing any previous one, and wake
    /// every caller waiting on it.
    fn push(
        &self,
        message_id: MessageId,
        status: PollingStatus,
        data: Option<ResultData>,
        problem: Option<ProblemDetails>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Record that the message was accepted for processing.
    fn accept(
        &self,
        message_id: MessageId,
        data: Option<ResultData>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.push(message_id, PollingStatus::Accepted, data, None)
    }

    /// Record that the message succeeded.
    fn succeed(
        &self,
        message_id: MessageId,
        data: Option<ResultData>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.push(message_id, PollingStatus::Succeeded, data, None)
    }

    /// Record that the message failed.
    fn fail(
        &self,
        message_id: MessageId,
        problem: ProblemDetails,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.push(message_id, PollingStatus::Failed, None, Some(problem))
    }
}

impl<T: Poller + ?Sized> Poller for std::sync::Arc<T> {
    fn poll<'a>(
        &'a self,
        message_id: MessageId,
        exclude_statuses: &'a [PollingStatus],
    ) -> Pin<Box<dyn Future<Output = PollingResult> + Send + 'a>> {
        (**self).poll(message_id, exclude_statuses)
    }

    fn peek<'a>(
        &'a self,
        message_id: MessageId,
        exclude_statuses: &'a [PollingStatus],
    ) -> Pin<Box<dyn Future<Output = Option<PollingResult>> + Send + 'a>> {
        (**self).peek(message_id, exclude_statuses)
    }

    fn push(
        &self,
        message_id: MessageId,
        status: PollingStatus,
        data: Option<ResultData>,
        problem: Option<ProblemDetails>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        (**self).push(message_id, status, data, problem)
    }
}
