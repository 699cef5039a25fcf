//! # Msgpoll Runtime
//!
//! The polling engine: an in-memory result store, timeout-bounded polling, and the
//! wiring that turns pipeline lifecycle signals into stored results.
//!
//! ## Components
//!
//! - [`DefaultPoller`]: the result store with broadcast wake-ups
//! - [`PollerWithTimeout`]: bounds `poll` by a timeout
//! - [`PollingConfig`]: which events report on which messages
//! - [`CompletionDispatcher`]: completion and correlated events → results
//! - [`FailureBridge`]: poison messages → failed results
//! - [`PollingPlugin`]: installs the above into a [`Pipeline`](msgpoll_core::Pipeline)
//!
//! ## Example
//!
//! ```ignore
//! use msgpoll_runtime::{DefaultPoller, PollerWithTimeout, PollingConfig};
//!
//! let poller = DefaultPoller::new();
//! PollingConfig::builder(poller.clone())
//!     .exclude_from_completion_events::<StartImport>()
//!     .succeeded(SuccessfulCompletionCorrelation::<ImportFinished>::new())
//!     .build()?
//!     .plugin()
//!     .install(&mut pipeline);
//!
//! let message_id = pipeline.send(&StartImport { .. }).await?;
//! let result = PollerWithTimeout::new(poller)
//!     .poll(message_id, Duration::from_secs(5), &[PollingStatus::Accepted])
//!     .await?;
//! ```

pub mod config;
pub mod default_poller;
pub mod dispatcher;
pub mod failure;
pub mod metrics;
pub mod plugin;
mod signal;
pub mod timeout;

pub use config::{
    AcceptedCorrelation, CorrelationEntry, CorrelationRegistry, FailedCompletionCorrelation,
    PollingConfig, PollingConfigBuilder, ProblemFactory, SuccessfulCompletionCorrelation,
};
pub use default_poller::DefaultPoller;
pub use dispatcher::CompletionDispatcher;
pub use error::{ConfigError, PollingTimeoutError};
pub use failure::FailureBridge;
pub use plugin::PollingPlugin;
pub use timeout::{DEFAULT_POLL_TIMEOUT, PollerWithTimeout};

/// Error types for the polling runtime
pub mod error {
    use msgpoll_core::message::MessageId;
    use msgpoll_core::result::PollingStatus;
    use std::time::Duration;
    use thiserror::Error;

    /// No matching result arrived before the poll timeout elapsed.
    ///
    /// Recoverable: poll again, or report the work as still in progress.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    #[error("Polling for message {message_id} timed out after {timeout:?}")]
    pub struct PollingTimeoutError {
        /// The message that was polled
        pub message_id: MessageId,
        /// The timeout that elapsed
        pub timeout: Duration,
    }

    /// Invalid polling configuration.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ConfigError {
        /// An event type was registered more than once
        #[error(
            "Event type '{message_type}' is already correlated as {registered}, cannot also correlate it as {attempted}"
        )]
        DuplicateCorrelation {
            /// Type token of the event
            message_type: String,
            /// Status of the existing registration
            registered: PollingStatus,
            /// Status of the rejected registration
            attempted: PollingStatus,
        },
    }
}
