//! # Msgpoll Core
//!
//! Core types and traits for discovering the outcome of messages sent through a
//! fire-and-forget message pipeline.
//!
//! A caller sends a message, keeps its [`MessageId`], and later asks a [`Poller`]
//! for the outcome: accepted, succeeded (with data) or failed (with RFC 7807
//! [`ProblemDetails`]). The pipeline side pushes outcomes as they become known.
//!
//! ## Modules
//!
//! - [`message`]: message ids, headers and the transport form of messages
//! - [`pipeline`]: what the polling engine needs from the message pipeline
//! - [`problem`]: RFC 7807 problem details
//! - [`result`]: stored results and their status
//! - [`poller`]: the [`Poller`] trait
//!
//! ## Example
//!
//! ```ignore
//! use msgpoll_core::*;
//!
//! let message_id = MessageId::new();
//! poller.push(message_id, PollingStatus::Accepted, None, None).await;
//!
//! // Elsewhere: wait past "accepted"
//! let result = poller.poll(message_id, &[PollingStatus::Accepted]).await;
//! assert!(result.is_success() || result.is_failure());
//! ```

pub mod message;
pub mod pipeline;
pub mod poller;
pub mod problem;
pub mod result;

// Re-export commonly used types
pub use message::{
    Message, MessageCompletedEvent, MessageError, MessageHeaders, MessageId, TransportMessage,
};
pub use pipeline::{
    BusError, CompletionListener, ErrorHandler, HandlerError, MessageBus, MessageContext,
    MessageHandler, Pipeline,
};
pub use poller::Poller;
pub use problem::ProblemDetails;
pub use result::{PollingResult, PollingStatus, ResultData};
