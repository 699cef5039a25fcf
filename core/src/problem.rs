//! RFC 7807 problem details.

use crate::message::MessageId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Problem type of an unexpected technical failure.
pub const TECHNICAL_ERROR_TYPE: &str = "urn:msgpoll:problem:technical-error";

/// Problem type of a failure reported by a domain event without further detail.
pub const OPERATION_FAILED_TYPE: &str = "urn:msgpoll:problem:operation-failed";

/// Machine-readable details of a failure, following RFC 7807.
///
/// Extension members are serialized at the top level next to the standard members.
///
/// # Example
///
/// ```
/// use msgpoll_core::problem::ProblemDetails;
///
/// let problem = ProblemDetails::new(
///     "https://api.example.com/problems/insufficient-funds",
///     "Insufficient Funds",
///     400,
/// )
/// .with_detail("Balance is 30, transfer needs 50")
/// .with_extension("balance", 30);
///
/// let json = serde_json::to_value(&problem).expect("serializes");
/// assert_eq!(json["type"], "https://api.example.com/problems/insufficient-funds");
/// assert_eq!(json["balance"], 30);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// URI reference identifying the problem type.
    #[serde(rename = "type")]
    pub problem_type: String,

    /// Short, human-readable summary of the problem type.
    pub title: String,

    /// HTTP status code.
    pub status: u16,

    /// Human-readable explanation specific to this occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// URI reference identifying this occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    /// Additional problem-specific members.
    #[serde(flatten)]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl ProblemDetails {
    /// Create a problem with the required members.
    #[must_use]
    pub fn new(problem_type: impl Into<String>, title: impl Into<String>, status: u16) -> Self {
        Self {
            problem_type: problem_type.into(),
            title: title.into(),
            status,
            detail: None,
            instance: None,
            extensions: HashMap::new(),
        }
    }

    /// Set the occurrence-specific explanation.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the occurrence URI.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Add an extension member.
    #[must_use]
    pub fn with_extension(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Generic technical error for a message whose processing crashed.
    ///
    /// The detail never mentions the underlying error.
    #[must_use]
    pub fn technical_error(message_id: MessageId) -> Self {
        Self::new(TECHNICAL_ERROR_TYPE, "Technical Error", 500)
            .with_detail(
                "An unexpected error occurred while processing your request. Please try again later.",
            )
            .with_instance(message_instance(message_id))
    }

    /// Generic failure for a message reported failed by an event that carries no
    /// problem of its own.
    #[must_use]
    pub fn operation_failed(message_id: MessageId) -> Self {
        Self::new(OPERATION_FAILED_TYPE, "Operation Failed", 500)
            .with_detail("The operation could not be completed.")
            .with_instance(message_instance(message_id))
    }
}

/// Occurrence URI of a message.
#[must_use]
pub fn message_instance(message_id: MessageId) -> String {
    format!("/messages/{message_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_serializes_as_rfc7807_json() {
        let problem = ProblemDetails::new("https://example.com/out-of-stock", "Out Of Stock", 409)
            .with_extension("sku", "sku-42");

        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["type"], "https://example.com/out-of-stock");
        assert_eq!(json["title"], "Out Of Stock");
        assert_eq!(json["status"], 409);
        assert_eq!(json["sku"], "sku-42");
        assert!(json.get("detail").is_none());
        assert!(json.get("extensions").is_none());

        let back: ProblemDetails = serde_json::from_value(json).unwrap();
        assert_eq!(back, problem);
    }

    #[test]
    fn test_technical_error_points_at_message() {
        let id = MessageId::new();
        let problem = ProblemDetails::technical_error(id);
        assert_eq!(problem.status, 500);
        assert_eq!(problem.problem_type, TECHNICAL_ERROR_TYPE);
        assert_eq!(problem.instance, Some(format!("/messages/{id}")));
        assert!(problem.extensions.is_empty());
    }
}
