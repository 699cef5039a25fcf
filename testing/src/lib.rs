//! # Msgpoll Testing
//!
//! Testing utilities for code that sends messages and polls their outcome.
//!
//! This crate provides:
//! - [`PollerTestDouble`]: a stubbed poller that records every call
//! - [`PollerSpy`]: records pushes while delegating to a real poller
//! - [`InMemoryPipeline`]: a single-process pipeline with retries and dead letters
//! - Message handlers for common test situations ([`handlers`])
//!
//! ## Example
//!
//! ```ignore
//! use msgpoll_testing::PollerTestDouble;
//!
//! #[tokio::test]
//! async fn test_import_endpoint_reports_row_count() {
//!     let poller = PollerTestDouble::new();
//!     poller.succeed_all(Some(ResultData::from([("rows".into(), 42.into())])));
//!
//!     let response = import_endpoint(&poller, request).await;
//!
//!     assert_eq!(response.rows, 42);
//!     assert_eq!(poller.poll_count(), 1);
//! }
//! ```

pub mod handlers;
pub mod pipeline;
pub mod poller_double;

pub use handlers::{CountingHandler, FailingHandler, HandlerFailure, PublishingHandler, SlowHandler};
pub use pipeline::{
    DEFAULT_MAX_ATTEMPTS, DeadLetter, InMemoryBus, InMemoryPipeline, RecordingErrorHandler,
    RunningPipeline,
};
pub use poller_double::{PollerSpy, PollerTestDouble, PushCall};
