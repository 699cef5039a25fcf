//! Messages as they travel through the pipeline.
//!
//! A [`Message`] is any serializable type with a stable type token. On the bus it is
//! carried as a [`TransportMessage`]: the type token, the `bincode` body and the
//! [`MessageHeaders`] the pipeline attaches (message id and correlation id).
//!
//! # Example
//!
//! ```
//! use msgpoll_core::message::{Message, MessageHeaders, MessageId, TransportMessage};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct PlaceOrder {
//!     sku: String,
//! }
//!
//! impl Message for PlaceOrder {
//!     const MESSAGE_TYPE: &'static str = "PlaceOrder.v1";
//! }
//!
//! let command = PlaceOrder { sku: "sku-1".to_string() };
//! let transport = TransportMessage::from_message(&command, MessageHeaders::new(MessageId::new()))
//!     .expect("serialization should succeed");
//!
//! assert!(transport.is::<PlaceOrder>());
//! assert_eq!(transport.decode::<PlaceOrder>().expect("decodes"), command);
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error types for message encoding and decoding.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Failed to serialize a message to bytes.
    #[error("Failed to serialize message: {0}")]
    SerializationError(String),

    /// Failed to deserialize a message from bytes.
    #[error("Failed to deserialize message: {0}")]
    DeserializationError(String),

    /// The transport message carries a different type than the one requested.
    #[error("Message type mismatch: expected '{expected}', found '{found}'")]
    TypeMismatch {
        /// Type token the caller asked for
        expected: &'static str,
        /// Type token found on the transport message
        found: String,
    },
}

/// Stable identifier of a message, used as the correlation key for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Create a new random message ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A message that can be sent or published on the bus.
///
/// The `MESSAGE_TYPE` token identifies the type on the wire and is the key used
/// to route messages to handlers and to look up correlation rules. Include a
/// version suffix so the schema can evolve:
///
/// - `"PlaceOrder.v1"`
/// - `"OrderPlaced.v2"`
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type token for this message type.
    const MESSAGE_TYPE: &'static str;

    /// Returns the type token of this message.
    fn message_type(&self) -> &'static str {
        Self::MESSAGE_TYPE
    }

    /// Serialize this message to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::SerializationError` if the message cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        bincode::serialize(self).map_err(|e| MessageError::SerializationError(e.to_string()))
    }

    /// Deserialize a message from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::DeserializationError` if the bytes do not represent
    /// this message type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError>
    where
        Self: Sized,
    {
        bincode::deserialize(bytes).map_err(|e| MessageError::DeserializationError(e.to_string()))
    }
}

/// Headers the pipeline attaches to every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeaders {
    /// Identifier of this message.
    pub message_id: MessageId,

    /// Identifier of the message that caused this one, if any.
    pub correlation_id: Option<MessageId>,

    /// Additional transport headers.
    pub extra: HashMap<String, String>,
}

impl MessageHeaders {
    /// Headers for a message with the given id and no correlation.
    #[must_use]
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            correlation_id: None,
            extra: HashMap::new(),
        }
    }

    /// Set the correlation id.
    #[must_use]
    pub const fn with_correlation_id(mut self, correlation_id: MessageId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Add an extra header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// The correlation id, or this message's own id when it starts a conversation.
    ///
    /// Messages published while handling this one inherit this value.
    #[must_use]
    pub fn effective_correlation_id(&self) -> MessageId {
        self.correlation_id.unwrap_or(self.message_id)
    }
}

/// A message in its on-the-wire form.
#[derive(Clone, Debug)]
pub struct TransportMessage {
    /// Pipeline headers.
    pub headers: MessageHeaders,

    /// Type token of the body (see [`Message::MESSAGE_TYPE`]).
    pub message_type: String,

    /// The bincode-serialized message.
    pub body: Vec<u8>,
}

impl TransportMessage {
    /// Create a transport message from raw parts.
    #[must_use]
    pub const fn new(headers: MessageHeaders, message_type: String, body: Vec<u8>) -> Self {
        Self {
            headers,
            message_type,
            body,
        }
    }

    /// Serialize a typed message into a transport message.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::SerializationError` if the message cannot be serialized.
    pub fn from_message<M: Message>(
        message: &M,
        headers: MessageHeaders,
    ) -> Result<Self, MessageError> {
        Ok(Self {
            headers,
            message_type: message.message_type().to_string(),
            body: message.to_bytes()?,
        })
    }

    /// Whether this transport message carries an `M`.
    #[must_use]
    pub fn is<M: Message>(&self) -> bool {
        self.message_type == M::MESSAGE_TYPE
    }

    /// Decode the body as an `M`.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::TypeMismatch` if the type token differs and
    /// `MessageError::DeserializationError` if the body cannot be decoded.
    pub fn decode<M: Message>(&self) -> Result<M, MessageError> {
        if !self.is::<M>() {
            return Err(MessageError::TypeMismatch {
                expected: M::MESSAGE_TYPE,
                found: self.message_type.clone(),
            });
        }
        M::from_bytes(&self.body)
    }

    /// Identifier of this message.
    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.headers.message_id
    }
}

impl fmt::Display for TransportMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransportMessage {{ type: {}, id: {}, size: {} bytes }}",
            self.message_type,
            self.headers.message_id,
            self.body.len()
        )
    }
}

/// Generic notification that a message was processed successfully.
///
/// Published with the completed message's id as correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCompletedEvent {
    /// Identifier of the message that completed.
    pub completed_message_id: MessageId,
}

impl Message for MessageCompletedEvent {
    const MESSAGE_TYPE: &'static str = "MessageCompleted.v1";
}
