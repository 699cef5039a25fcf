//! Correlation configuration.
//!
//! Declares which domain events report on which message, and how each event turns
//! into a stored result:
//!
//! - [`AcceptedCorrelation`]: the event means "accepted for processing"
//! - [`SuccessfulCompletionCorrelation`]: the event means "succeeded", optionally with data
//! - [`FailedCompletionCorrelation`]: the event means "failed", optionally with a problem
//!
//! By default the target message is the event's correlation id, i.e. the id of the
//! message being handled when the event was published.
//!
//! # Example
//!
//! ```ignore
//! let config = PollingConfig::builder(poller.clone())
//!     .accepted(AcceptedCorrelation::<ImportStarted>::new())
//!     .succeeded(
//!         SuccessfulCompletionCorrelation::<ImportFinished>::new()
//!             .with_data_builder(|event| ResultData::from([("rows".into(), event.rows.into())])),
//!     )
//!     .failed(
//!         FailedCompletionCorrelation::<ImportRejected>::new().with_problem_builder(|event| {
//!             ProblemDetails::new("https://api.example.com/problems/bad-file", "Bad File", 422)
//!                 .with_detail(event.reason.clone())
//!         }),
//!     )
//!     .exclude_from_completion_events::<StartImport>()
//!     .build()?;
//! ```

use crate::error::ConfigError;
use msgpoll_core::message::{
    Message, MessageCompletedEvent, MessageError, MessageId, TransportMessage,
};
use msgpoll_core::poller::Poller;
use msgpoll_core::problem::ProblemDetails;
use msgpoll_core::result::{PollingResult, PollingStatus, ResultData};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::sync::Arc;

/// Extracts the target message id from an event.
pub type MessageIdGetter<E> = Arc<dyn Fn(&E) -> MessageId + Send + Sync>;

/// Builds success data from an event.
pub type DataBuilder<E> = Arc<dyn Fn(&E) -> ResultData + Send + Sync>;

/// Builds problem details from a failure event.
pub type ProblemBuilder<E> = Arc<dyn Fn(&E) -> ProblemDetails + Send + Sync>;

/// Converts an unhandled processing error into problem details.
pub type ProblemFactory = Arc<
    dyn Fn(&(dyn Error + Send + Sync + 'static), &TransportMessage) -> ProblemDetails + Send + Sync,
>;

/// Maps an event of type `E` to an accepted result.
pub struct AcceptedCorrelation<E> {
    message_id_getter: Option<MessageIdGetter<E>>,
    data_builder: Option<DataBuilder<E>>,
}

/// Maps an event of type `E` to a succeeded result.
pub struct SuccessfulCompletionCorrelation<E> {
    message_id_getter: Option<MessageIdGetter<E>>,
    data_builder: Option<DataBuilder<E>>,
}

/// Maps an event of type `E` to a failed result.
pub struct FailedCompletionCorrelation<E> {
    message_id_getter: Option<MessageIdGetter<E>>,
    problem_builder: Option<ProblemBuilder<E>>,
}

macro_rules! impl_correlation_common {
    ($name:ident) => {
        impl<E> Default for $name<E> {
            fn default() -> Self {
                Self::empty()
            }
        }

        impl<E: Message> $name<E> {
            /// Correlate by the event's correlation id.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Correlate by an id carried inside the event instead.
            #[must_use]
            pub fn with_message_id_getter(
                mut self,
                getter: impl Fn(&E) -> MessageId + Send + Sync + 'static,
            ) -> Self {
                self.message_id_getter = Some(Arc::new(getter));
                self
            }
        }
    };
}

impl<E> AcceptedCorrelation<E> {
    const fn empty() -> Self {
        Self {
            message_id_getter: None,
            data_builder: None,
        }
    }
}

impl<E> SuccessfulCompletionCorrelation<E> {
    const fn empty() -> Self {
        Self {
            message_id_getter: None,
            data_builder: None,
        }
    }
}

impl<E> FailedCompletionCorrelation<E> {
    const fn empty() -> Self {
        Self {
            message_id_getter: None,
            problem_builder: None,
        }
    }
}

impl_correlation_common!(AcceptedCorrelation);
impl_correlation_common!(SuccessfulCompletionCorrelation);
impl_correlation_common!(FailedCompletionCorrelation);

impl<E: Message> AcceptedCorrelation<E> {
    /// Attach data built from the event to the accepted result.
    #[must_use]
    pub fn with_data_builder(
        mut self,
        builder: impl Fn(&E) -> ResultData + Send + Sync + 'static,
    ) -> Self {
        self.data_builder = Some(Arc::new(builder));
        self
    }
}

impl<E: Message> SuccessfulCompletionCorrelation<E> {
    /// Attach data built from the event to the succeeded result.
    #[must_use]
    pub fn with_data_builder(
        mut self,
        builder: impl Fn(&E) -> ResultData + Send + Sync + 'static,
    ) -> Self {
        self.data_builder = Some(Arc::new(builder));
        self
    }
}

impl<E: Message> FailedCompletionCorrelation<E> {
    /// Build the problem details of the failed result from the event.
    ///
    /// Without a builder the result carries [`ProblemDetails::operation_failed`].
    #[must_use]
    pub fn with_problem_builder(
        mut self,
        builder: impl Fn(&E) -> ProblemDetails + Send + Sync + 'static,
    ) -> Self {
        self.problem_builder = Some(Arc::new(builder));
        self
    }
}

/// Turns an observed event into the result it reports, if any.
pub trait Correlation: Send + Sync {
    /// Map `event` to a result.
    ///
    /// Returns `Ok(None)` when the event cannot be tied to a message (no getter and
    /// no correlation id).
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] if the event body cannot be decoded.
    fn correlate(&self, event: &TransportMessage) -> Result<Option<PollingResult>, MessageError>;
}

fn target_id<E>(
    getter: Option<&MessageIdGetter<E>>,
    decoded: &E,
    event: &TransportMessage,
) -> Option<MessageId> {
    match getter {
        Some(getter) => Some(getter(decoded)),
        None => event.headers.correlation_id,
    }
}

impl<E: Message> Correlation for AcceptedCorrelation<E> {
    fn correlate(&self, event: &TransportMessage) -> Result<Option<PollingResult>, MessageError> {
        let decoded = event.decode::<E>()?;
        Ok(target_id(self.message_id_getter.as_ref(), &decoded, event).map(|message_id| {
            let data = self.data_builder.as_ref().map(|build| build(&decoded));
            PollingResult::accepted(message_id, data)
        }))
    }
}

impl<E: Message> Correlation for SuccessfulCompletionCorrelation<E> {
    fn correlate(&self, event: &TransportMessage) -> Result<Option<PollingResult>, MessageError> {
        let decoded = event.decode::<E>()?;
        Ok(target_id(self.message_id_getter.as_ref(), &decoded, event).map(|message_id| {
            let data = self.data_builder.as_ref().map(|build| build(&decoded));
            PollingResult::succeeded(message_id, data)
        }))
    }
}

impl<E: Message> Correlation for FailedCompletionCorrelation<E> {
    fn correlate(&self, event: &TransportMessage) -> Result<Option<PollingResult>, MessageError> {
        let decoded = event.decode::<E>()?;
        Ok(target_id(self.message_id_getter.as_ref(), &decoded, event).map(|message_id| {
            let problem = self.problem_builder.as_ref().map_or_else(
                || ProblemDetails::operation_failed(message_id),
                |build| build(&decoded),
            );
            PollingResult::failed(message_id, problem)
        }))
    }
}

/// A registered correlation, tagged by the status it reports.
pub enum CorrelationEntry {
    /// Event means "accepted".
    Accepted(Box<dyn Correlation>),
    /// Event means "succeeded".
    Succeeded(Box<dyn Correlation>),
    /// Event means "failed".
    Failed(Box<dyn Correlation>),
}

impl CorrelationEntry {
    /// Status pushed for events of this entry.
    #[must_use]
    pub const fn status(&self) -> PollingStatus {
        match self {
            Self::Accepted(_) => PollingStatus::Accepted,
            Self::Succeeded(_) => PollingStatus::Succeeded,
            Self::Failed(_) => PollingStatus::Failed,
        }
    }

    /// Map `event` to a result.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] if the event body cannot be decoded.
    pub fn resolve(&self, event: &TransportMessage) -> Result<Option<PollingResult>, MessageError> {
        match self {
            Self::Accepted(c) | Self::Succeeded(c) | Self::Failed(c) => c.correlate(event),
        }
    }
}

impl std::fmt::Debug for CorrelationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CorrelationEntry::{:?}", self.status())
    }
}

/// Correlation entries keyed by event type token.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    entries: HashMap<String, CorrelationEntry>,
}

impl CorrelationRegistry {
    /// Register `entry` for `message_type`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateCorrelation`] if the type is already registered.
    pub fn insert(
        &mut self,
        message_type: &str,
        entry: CorrelationEntry,
    ) -> Result<(), ConfigError> {
        if let Some(existing) = self.entries.get(message_type) {
            return Err(ConfigError::DuplicateCorrelation {
                message_type: message_type.to_string(),
                registered: existing.status(),
                attempted: entry.status(),
            });
        }
        self.entries.insert(message_type.to_string(), entry);
        Ok(())
    }

    /// Entry for an event type, if registered.
    #[must_use]
    pub fn get(&self, message_type: &str) -> Option<&CorrelationEntry> {
        self.entries.get(message_type)
    }

    /// Whether an event type is registered.
    #[must_use]
    pub fn contains(&self, message_type: &str) -> bool {
        self.entries.contains_key(message_type)
    }

    /// Registered event types.
    pub fn message_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Registered event types reporting `status`.
    pub fn message_types_for(&self, status: PollingStatus) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(_, entry)| entry.status() == status)
            .map(|(message_type, _)| message_type.as_str())
    }

    /// Number of registered event types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-wide polling configuration.
///
/// Built once at startup with [`PollingConfig::builder`] and read-only afterwards.
pub struct PollingConfig {
    poller: Arc<dyn Poller>,
    correlations: CorrelationRegistry,
    auto_publish_completion_events: bool,
    exclude_from_completion_events: HashSet<String>,
    problem_factory: Option<ProblemFactory>,
}

impl PollingConfig {
    /// Start configuring polling for `poller`.
    ///
    /// Pass a clone (or an `Arc`) of the poller callers will poll.
    #[must_use]
    pub fn builder(poller: impl Poller + 'static) -> PollingConfigBuilder {
        PollingConfigBuilder {
            poller: Arc::new(poller),
            correlations: CorrelationRegistry::default(),
            auto_publish_completion_events: true,
            exclude_from_completion_events: HashSet::new(),
            problem_factory: None,
            errors: Vec::new(),
        }
    }

    /// The poller results are pushed to.
    #[must_use]
    pub fn poller(&self) -> Arc<dyn Poller> {
        Arc::clone(&self.poller)
    }

    /// Registered correlations.
    #[must_use]
    pub const fn correlations(&self) -> &CorrelationRegistry {
        &self.correlations
    }

    /// Whether a generic completion notification is published after each message.
    #[must_use]
    pub const fn auto_publish_completion_events(&self) -> bool {
        self.auto_publish_completion_events
    }

    /// Whether completing a message of this type is ignored by the completion path.
    #[must_use]
    pub fn is_excluded_from_completion_events(&self, message_type: &str) -> bool {
        self.exclude_from_completion_events.contains(message_type)
    }

    /// Message types whose completion is ignored.
    #[must_use]
    pub const fn exclude_from_completion_events(&self) -> &HashSet<String> {
        &self.exclude_from_completion_events
    }

    /// Converter for unhandled errors, if configured.
    #[must_use]
    pub const fn problem_factory(&self) -> Option<&ProblemFactory> {
        self.problem_factory.as_ref()
    }
}

impl std::fmt::Debug for PollingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingConfig")
            .field("correlations", &self.correlations)
            .field(
                "auto_publish_completion_events",
                &self.auto_publish_completion_events,
            )
            .field(
                "exclude_from_completion_events",
                &self.exclude_from_completion_events,
            )
            .field("problem_factory", &self.problem_factory.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`PollingConfig`].
#[must_use]
pub struct PollingConfigBuilder {
    poller: Arc<dyn Poller>,
    correlations: CorrelationRegistry,
    auto_publish_completion_events: bool,
    exclude_from_completion_events: HashSet<String>,
    problem_factory: Option<ProblemFactory>,
    errors: Vec<ConfigError>,
}

impl PollingConfigBuilder {
    fn register<E: Message>(mut self, entry: CorrelationEntry) -> Self {
        if let Err(err) = self.correlations.insert(E::MESSAGE_TYPE, entry) {
            self.errors.push(err);
        }
        self
    }

    /// Treat events of type `E` as "accepted".
    pub fn accepted<E: Message>(self, correlation: AcceptedCorrelation<E>) -> Self {
        self.register::<E>(CorrelationEntry::Accepted(Box::new(correlation)))
    }

    /// Treat events of type `E` as "succeeded".
    pub fn succeeded<E: Message>(self, correlation: SuccessfulCompletionCorrelation<E>) -> Self {
        self.register::<E>(CorrelationEntry::Succeeded(Box::new(correlation)))
    }

    /// Treat events of type `E` as "failed".
    pub fn failed<E: Message>(self, correlation: FailedCompletionCorrelation<E>) -> Self {
        self.register::<E>(CorrelationEntry::Failed(Box::new(correlation)))
    }

    /// Publish a [`MessageCompletedEvent`] after each handled message (default: on).
    pub const fn auto_publish_completion_events(mut self, enabled: bool) -> Self {
        self.auto_publish_completion_events = enabled;
        self
    }

    /// Do not treat completion of an `M` as completion of the work it started.
    ///
    /// Use this for commands whose outcome is reported by a domain event instead.
    pub fn exclude_from_completion_events<M: Message>(self) -> Self {
        self.exclude_message_type(M::MESSAGE_TYPE)
    }

    /// [`Self::exclude_from_completion_events`] by type token.
    pub fn exclude_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.exclude_from_completion_events.insert(message_type.into());
        self
    }

    /// Convert unhandled errors with `factory` instead of the generic technical error.
    pub fn problem_factory(
        mut self,
        factory: impl Fn(&(dyn Error + Send + Sync + 'static), &TransportMessage) -> ProblemDetails
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.problem_factory = Some(Arc::new(factory));
        self
    }

    /// Validate and build the configuration.
    ///
    /// The generic completion notification is always excluded from triggering
    /// another notification. With auto-publishing on, it is also registered as a
    /// successful completion of the message it names, unless registered explicitly.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] recorded while registering correlations.
    pub fn build(mut self) -> Result<PollingConfig, ConfigError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        self.exclude_from_completion_events
            .insert(MessageCompletedEvent::MESSAGE_TYPE.to_string());

        if self.auto_publish_completion_events
            && !self.correlations.contains(MessageCompletedEvent::MESSAGE_TYPE)
        {
            let completed = SuccessfulCompletionCorrelation::<MessageCompletedEvent>::new()
                .with_message_id_getter(|event| event.completed_message_id);
            self.correlations.insert(
                MessageCompletedEvent::MESSAGE_TYPE,
                CorrelationEntry::Succeeded(Box::new(completed)),
            )?;
        }

        tracing::debug!(
            correlations = self.correlations.len(),
            excluded = self.exclude_from_completion_events.len(),
            auto_publish = self.auto_publish_completion_events,
            "Polling configuration built"
        );

        Ok(PollingConfig {
            poller: self.poller,
            correlations: self.correlations,
            auto_publish_completion_events: self.auto_publish_completion_events,
            exclude_from_completion_events: self.exclude_from_completion_events,
            problem_factory: self.problem_factory,
        })
    }
}
