//! Poller test doubles.
//!
//! - [`PollerTestDouble`]: stub what `poll`/`peek` return and inspect every call
//! - [`PollerSpy`]: wrap a real poller and inspect the pushes it receives

use msgpoll_core::message::MessageId;
use msgpoll_core::poller::Poller;
use msgpoll_core::problem::ProblemDetails;
use msgpoll_core::result::{PollingResult, PollingStatus, ResultData};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Arguments of one recorded `push`.
#[derive(Debug, Clone, PartialEq)]
pub struct PushCall {
    /// Target message
    pub message_id: MessageId,
    /// Pushed status
    pub status: PollingStatus,
    /// Pushed data
    pub data: Option<ResultData>,
    /// Pushed problem
    pub problem: Option<ProblemDetails>,
}

#[derive(Default)]
struct DoubleState {
    stubbed: HashMap<MessageId, PollingResult>,
    default: Option<(PollingStatus, Option<ResultData>, Option<ProblemDetails>)>,
    poll_calls: Vec<MessageId>,
    peek_calls: Vec<MessageId>,
    push_calls: Vec<PushCall>,
}

impl DoubleState {
    fn result_for(&self, message_id: MessageId) -> Option<PollingResult> {
        if let Some(result) = self.stubbed.get(&message_id) {
            return Some(result.clone());
        }
        let (status, data, problem) = self.default.clone()?;
        Some(PollingResult::new(message_id, status, data, problem))
    }
}

/// A poller that returns stubbed results and records every interaction.
///
/// Pushed results become stubs, so code that pushes and then polls sees its own
/// pushes. `poll` never waits.
///
/// # Example
///
/// ```
/// use msgpoll_core::{MessageId, Poller, ProblemDetails};
/// use msgpoll_testing::PollerTestDouble;
///
/// # #[tokio::main]
/// # async fn main() {
/// let poller = PollerTestDouble::new();
/// let message_id = MessageId::new();
///
/// poller.stub_failure(
///     message_id,
///     ProblemDetails::new("https://api.example.com/problems/insufficient-funds", "Insufficient Funds", 400),
/// );
///
/// let result = poller.poll(message_id, &[]).await;
/// assert!(result.is_failure());
/// assert_eq!(poller.poll_count(), 1);
/// assert!(poller.was_polled(message_id));
/// # }
/// ```
#[derive(Clone, Default)]
pub struct PollerTestDouble {
    state: Arc<Mutex<DoubleState>>,
}

impl PollerTestDouble {
    /// Create a double with no stubs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DoubleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stub the result returned for `message_id`.
    pub fn stub_result(
        &self,
        message_id: MessageId,
        status: PollingStatus,
        data: Option<ResultData>,
        problem: Option<ProblemDetails>,
    ) {
        let result = PollingResult::new(message_id, status, data, problem);
        self.lock().stubbed.insert(message_id, result);
    }

    /// Stub an accepted result.
    pub fn stub_accepted(&self, message_id: MessageId, data: Option<ResultData>) {
        self.stub_result(message_id, PollingStatus::Accepted, data, None);
    }

    /// Stub a succeeded result.
    pub fn stub_success(&self, message_id: MessageId, data: Option<ResultData>) {
        self.stub_result(message_id, PollingStatus::Succeeded, data, None);
    }

    /// Stub a failed result.
    pub fn stub_failure(&self, message_id: MessageId, problem: ProblemDetails) {
        self.stub_result(message_id, PollingStatus::Failed, None, Some(problem));
    }

    /// Answer every unstubbed message with an accepted result.
    pub fn accept_all(&self, data: Option<ResultData>) {
        self.lock().default = Some((PollingStatus::Accepted, data, None));
    }

    /// Answer every unstubbed message with a succeeded result.
    pub fn succeed_all(&self, data: Option<ResultData>) {
        self.lock().default = Some((PollingStatus::Succeeded, data, None));
    }

    /// Answer every unstubbed message with a failed result.
    pub fn fail_all(&self, problem: Option<ProblemDetails>) {
        self.lock().default = Some((PollingStatus::Failed, None, problem));
    }

    /// Number of `poll` calls.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.lock().poll_calls.len()
    }

    /// Number of `peek` calls.
    #[must_use]
    pub fn peek_count(&self) -> usize {
        self.lock().peek_calls.len()
    }

    /// Number of `push` calls.
    #[must_use]
    pub fn push_count(&self) -> usize {
        self.lock().push_calls.len()
    }

    /// Message id of the last `poll` call.
    #[must_use]
    pub fn last_poll_message_id(&self) -> Option<MessageId> {
        self.lock().poll_calls.last().copied()
    }

    /// Message id of the last `peek` call.
    #[must_use]
    pub fn last_peek_message_id(&self) -> Option<MessageId> {
        self.lock().peek_calls.last().copied()
    }

    /// Arguments of the last `push` call.
    #[must_use]
    pub fn last_push(&self) -> Option<PushCall> {
        self.lock().push_calls.last().cloned()
    }

    /// Message ids of all `poll` calls, in order.
    #[must_use]
    pub fn all_poll_calls(&self) -> Vec<MessageId> {
        self.lock().poll_calls.clone()
    }

    /// Message ids of all `peek` calls, in order.
    #[must_use]
    pub fn all_peek_calls(&self) -> Vec<MessageId> {
        self.lock().peek_calls.clone()
    }

    /// Arguments of all `push` calls, in order.
    #[must_use]
    pub fn all_push_calls(&self) -> Vec<PushCall> {
        self.lock().push_calls.clone()
    }

    /// Whether `message_id` was polled at least once.
    #[must_use]
    pub fn was_polled(&self, message_id: MessageId) -> bool {
        self.lock().poll_calls.contains(&message_id)
    }

    /// Whether a result was pushed for `message_id` at least once.
    #[must_use]
    pub fn was_pushed(&self, message_id: MessageId) -> bool {
        self.lock()
            .push_calls
            .iter()
            .any(|call| call.message_id == message_id)
    }

    /// Forget all stubs, the default answer and every recorded call.
    pub fn reset(&self) {
        *self.lock() = DoubleState::default();
    }

    /// Record a poll and return its stubbed answer.
    ///
    /// # Panics
    ///
    /// Panics if nothing is stubbed for `message_id` and no default answer is set,
    /// or if the stubbed status is excluded.
    #[allow(clippy::panic)]
    fn answer_poll(
        &self,
        message_id: MessageId,
        exclude_statuses: &[PollingStatus],
    ) -> PollingResult {
        let mut state = self.lock();
        state.poll_calls.push(message_id);

        let Some(result) = state.result_for(message_id) else {
            panic!(
                "No result stubbed for message {message_id}. Use stub_result(), \
                 stub_success()/stub_failure(), or accept_all()/succeed_all()/fail_all() \
                 to configure expected results."
            );
        };
        if result.has_status_in(exclude_statuses) {
            panic!(
                "Result for message {message_id} has status '{}' which is in the excluded statuses {exclude_statuses:?}",
                result.status
            );
        }
        result
    }
}

impl std::fmt::Debug for PollerTestDouble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("PollerTestDouble")
            .field("stubbed", &state.stubbed.len())
            .field("polls", &state.poll_calls.len())
            .field("peeks", &state.peek_calls.len())
            .field("pushes", &state.push_calls.len())
            .finish()
    }
}

impl Poller for PollerTestDouble {
    /// # Panics
    ///
    /// Panics if no answer is stubbed for `message_id`, or if the stubbed status is
    /// excluded.
    fn poll<'a>(
        &'a self,
        message_id: MessageId,
        exclude_statuses: &'a [PollingStatus],
    ) -> Pin<Box<dyn Future<Output = PollingResult> + Send + 'a>> {
        let result = self.answer_poll(message_id, exclude_statuses);
        Box::pin(async move { result })
    }

    fn peek<'a>(
        &'a self,
        message_id: MessageId,
        exclude_statuses: &'a [PollingStatus],
    ) -> Pin<Box<dyn Future<Output = Option<PollingResult>> + Send + 'a>> {
        let result = {
            let mut state = self.lock();
            state.peek_calls.push(message_id);
            state
                .result_for(message_id)
                .filter(|result| !result.has_status_in(exclude_statuses))
        };
        Box::pin(async move { result })
    }

    fn push(
        &self,
        message_id: MessageId,
        status: PollingStatus,
        data: Option<ResultData>,
        problem: Option<ProblemDetails>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        {
            let mut state = self.lock();
            state.push_calls.push(PushCall {
                message_id,
                status,
                data: data.clone(),
                problem: problem.clone(),
            });
            let result = PollingResult::new(message_id, status, data, problem);
            state.stubbed.insert(message_id, result);
        }
        Box::pin(async {})
    }
}

/// Records pushes and delegates everything to a wrapped poller.
///
/// # Example
///
/// ```
/// use msgpoll_core::{MessageId, Poller, PollingStatus};
/// use msgpoll_testing::{PollerSpy, PollerTestDouble};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let spy = PollerSpy::new(Arc::new(PollerTestDouble::new()));
/// let message_id = MessageId::new();
///
/// spy.push(message_id, PollingStatus::Succeeded, None, None).await;
///
/// assert_eq!(spy.push_count(), 1);
/// assert!(spy.was_pushed(message_id));
/// assert!(spy.peek(message_id, &[]).await.is_some());
/// # }
/// ```
#[derive(Clone)]
pub struct PollerSpy {
    inner: Arc<dyn Poller>,
    push_calls: Arc<Mutex<Vec<PushCall>>>,
}

impl PollerSpy {
    /// Spy on `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Poller>) -> Self {
        Self {
            inner,
            push_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> MutexGuard<'_, Vec<PushCall>> {
        self.push_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of `push` calls.
    #[must_use]
    pub fn push_count(&self) -> usize {
        self.calls().len()
    }

    /// Arguments of the last `push` call.
    #[must_use]
    pub fn last_push(&self) -> Option<PushCall> {
        self.calls().last().cloned()
    }

    /// Arguments of all `push` calls, in order.
    #[must_use]
    pub fn all_push_calls(&self) -> Vec<PushCall> {
        self.calls().clone()
    }

    /// Whether a result was pushed for `message_id` at least once.
    #[must_use]
    pub fn was_pushed(&self, message_id: MessageId) -> bool {
        self.calls()
            .iter()
            .any(|call| call.message_id == message_id)
    }

    /// Forget recorded pushes.
    pub fn reset(&self) {
        self.calls().clear();
    }
}

impl std::fmt::Debug for PollerSpy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerSpy")
            .field("pushes", &self.push_count())
            .finish_non_exhaustive()
    }
}

impl Poller for PollerSpy {
    fn poll<'a>(
        &'a self,
        message_id: MessageId,
        exclude_statuses: &'a [PollingStatus],
    ) -> Pin<Box<dyn Future<Output = PollingResult> + Send + 'a>> {
        self.inner.poll(message_id, exclude_statuses)
    }

    fn peek<'a>(
        &'a self,
        message_id: MessageId,
        exclude_statuses: &'a [PollingStatus],
    ) -> Pin<Box<dyn Future<Output = Option<PollingResult>> + Send + 'a>> {
        self.inner.peek(message_id, exclude_statuses)
    }

    fn push(
        &self,
        message_id: MessageId,
        status: PollingStatus,
        data: Option<ResultData>,
        problem: Option<ProblemDetails>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.calls().push(PushCall {
            message_id,
            status,
            data: data.clone(),
            problem: problem.clone(),
        });
        self.inner.push(message_id, status, data, problem)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn data(key: &str, value: i64) -> ResultData {
        ResultData::from([(key.to_string(), json!(value))])
    }

    #[tokio::test]
    async fn test_stubbed_success_is_returned_and_recorded() {
        let poller = PollerTestDouble::new();
        let id = MessageId::new();
        poller.stub_success(id, Some(data("succeeded", 100)));

        let result = poller.poll(id, &[]).await;

        assert!(result.is_success());
        assert_eq!(result.data.unwrap()["succeeded"], 100);
        assert_eq!(poller.poll_count(), 1);
        assert_eq!(poller.last_poll_message_id(), Some(id));
    }

    #[tokio::test]
    async fn test_defaults_answer_unstubbed_ids() {
        let poller = PollerTestDouble::new();
        poller.accept_all(None);
        assert!(poller.poll(MessageId::new(), &[]).await.is_accepted());

        poller.fail_all(Some(ProblemDetails::technical_error(MessageId::new())));
        let result = poller.poll(MessageId::new(), &[]).await;
        assert!(result.is_failure());
        assert_eq!(result.problem.unwrap().status, 500);
    }

    #[tokio::test]
    async fn test_peek_filters_and_never_panics() {
        let poller = PollerTestDouble::new();
        let id = MessageId::new();
        assert!(poller.peek(id, &[]).await.is_none());

        poller.stub_accepted(id, None);
        assert!(poller.peek(id, &[PollingStatus::Accepted]).await.is_none());
        assert!(poller.peek(id, &[]).await.unwrap().is_accepted());
        assert_eq!(poller.peek_count(), 3);
        assert_eq!(poller.last_peek_message_id(), Some(id));
    }

    #[tokio::test]
    async fn test_pushes_are_recorded_and_become_stubs() {
        let poller = PollerTestDouble::new();
        let id = MessageId::new();

        poller
            .push(id, PollingStatus::Succeeded, Some(data("result", 1)), None)
            .await;

        assert_eq!(poller.push_count(), 1);
        assert!(poller.was_pushed(id));
        assert_eq!(poller.last_push().unwrap().data, Some(data("result", 1)));
        assert!(poller.poll(id, &[]).await.is_success());
        assert!(poller.was_polled(id));
    }

    #[tokio::test]
    async fn test_reset_forgets_everything() {
        let poller = PollerTestDouble::new();
        poller.succeed_all(None);
        poller
            .push(MessageId::new(), PollingStatus::Accepted, None, None)
            .await;
        let _ = poller.poll(MessageId::new(), &[]).await;

        poller.reset();

        assert_eq!(poller.poll_count(), 0);
        assert_eq!(poller.push_count(), 0);
        assert!(poller.all_push_calls().is_empty());
        assert!(poller.peek(MessageId::new(), &[]).await.is_none());
    }

    #[tokio::test]
    #[should_panic(expected = "No result stubbed")]
    async fn test_unstubbed_poll_panics() {
        let poller = PollerTestDouble::new();
        let _ = poller.poll(MessageId::new(), &[]).await;
    }

    #[tokio::test]
    #[should_panic(expected = "excluded statuses")]
    async fn test_excluded_stub_panics() {
        let poller = PollerTestDouble::new();
        let id = MessageId::new();
        poller.stub_accepted(id, None);
        let _ = poller.poll(id, &[PollingStatus::Accepted]).await;
    }

    #[tokio::test]
    async fn test_spy_records_pushes_and_delegates() {
        let inner = PollerTestDouble::new();
        let spy = PollerSpy::new(Arc::new(inner.clone()));
        let id = MessageId::new();

        let problem = ProblemDetails::technical_error(id);
        spy.push(id, PollingStatus::Failed, None, Some(problem)).await;

        assert_eq!(spy.push_count(), 1);
        assert_eq!(spy.last_push().unwrap().status, PollingStatus::Failed);
        assert_eq!(inner.push_count(), 1);
        assert!(spy.poll(id, &[]).await.is_failure());

        spy.reset();
        assert_eq!(spy.push_count(), 0);
        assert!(!spy.was_pushed(id));
    }
}
