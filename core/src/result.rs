//! Results stored for polled messages.

use crate::message::MessageId;
use crate::problem::ProblemDetails;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Success payload of a result.
pub type ResultData = HashMap<String, serde_json::Value>;

/// Processing status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollingStatus {
    /// The message was accepted for processing but has not finished.
    Accepted,
    /// The message was processed successfully.
    Succeeded,
    /// The message failed.
    Failed,
}

impl fmt::Display for PollingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The current outcome recorded for a message.
///
/// A new push for the same message replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingResult {
    /// The message this result belongs to.
    pub message_id: MessageId,

    /// Processing status.
    pub status: PollingStatus,

    /// Success data (batch counts, created ids, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResultData>,

    /// Structured failure information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<ProblemDetails>,
}

impl PollingResult {
    /// Create a result from its parts.
    #[must_use]
    pub const fn new(
        message_id: MessageId,
        status: PollingStatus,
        data: Option<ResultData>,
        problem: Option<ProblemDetails>,
    ) -> Self {
        Self {
            message_id,
            status,
            data,
            problem,
        }
    }

    /// An accepted result.
    #[must_use]
    pub const fn accepted(message_id: MessageId, data: Option<ResultData>) -> Self {
        Self::new(message_id, PollingStatus::Accepted, data, None)
    }

    /// A succeeded result.
    #[must_use]
    pub const fn succeeded(message_id: MessageId, data: Option<ResultData>) -> Self {
        Self::new(message_id, PollingStatus::Succeeded, data, None)
    }

    /// A failed result.
    #[must_use]
    pub const fn failed(message_id: MessageId, problem: ProblemDetails) -> Self {
        Self::new(message_id, PollingStatus::Failed, None, Some(problem))
    }

    /// The operation was accepted for processing.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == PollingStatus::Accepted
    }

    /// The operation succeeded and carries no problem.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PollingStatus::Succeeded && self.problem.is_none()
    }

    /// The operation failed, or carries a problem whatever its status says.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == PollingStatus::Failed || self.problem.is_some()
    }

    /// Whether the status is one of `statuses`.
    #[must_use]
    pub fn has_status_in(&self, statuses: &[PollingStatus]) -> bool {
        statuses.contains(&self.status)
    }
}
