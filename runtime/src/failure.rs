//! Failure bridge: poison messages become failed results.

use crate::config::{PollingConfig, ProblemFactory};
use crate::metrics::DispatchMetrics;
use msgpoll_core::message::TransportMessage;
use msgpoll_core::pipeline::ErrorHandler;
use msgpoll_core::poller::Poller;
use msgpoll_core::problem::ProblemDetails;
use msgpoll_core::result::PollingStatus;
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Wraps the pipeline's terminal-failure handler and records a failed result for
/// every poison message.
///
/// The wrapped handler always runs first. The stored problem comes from the
/// configured [`ProblemFactory`], or is [`ProblemDetails::technical_error`], which
/// never includes the error text.
pub struct FailureBridge {
    inner: Arc<dyn ErrorHandler>,
    poller: Arc<dyn Poller>,
    problem_factory: Option<ProblemFactory>,
}

impl FailureBridge {
    /// Wrap `inner`, pushing to the poller of `config`.
    #[must_use]
    pub fn new(inner: Arc<dyn ErrorHandler>, config: &PollingConfig) -> Self {
        Self {
            inner,
            poller: config.poller(),
            problem_factory: config.problem_factory().cloned(),
        }
    }

    fn problem_for(
        &self,
        message: &TransportMessage,
        error: &(dyn Error + Send + Sync + 'static),
    ) -> ProblemDetails {
        self.problem_factory.as_ref().map_or_else(
            || ProblemDetails::technical_error(message.message_id()),
            |factory| factory(error, message),
        )
    }

    async fn handle(
        &self,
        message: &TransportMessage,
        error: &(dyn Error + Send + Sync + 'static),
    ) {
        self.inner.handle_poison_message(message, error).await;

        let message_id = message.message_id();
        let problem = self.problem_for(message, error);
        tracing::warn!(
            message_id = %message_id,
            message_type = %message.message_type,
            error = %error,
            status = problem.status,
            "Poison message recorded as failed"
        );
        DispatchMetrics::record_poison_message();

        self.poller
            .push(message_id, PollingStatus::Failed, None, Some(problem))
            .await;
    }
}

impl std::fmt::Debug for FailureBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureBridge")
            .field("problem_factory", &self.problem_factory.is_some())
            .finish_non_exhaustive()
    }
}

impl ErrorHandler for FailureBridge {
    fn handle_poison_message<'a>(
        &'a self,
        message: &'a TransportMessage,
        error: &'a (dyn Error + Send + Sync + 'static),
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.handle(message, error))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::DefaultPoller;
    use msgpoll_core::message::{MessageHeaders, MessageId};
    use std::sync::Mutex;
    use std::sync::PoisonError;

    #[derive(Default)]
    struct DeadLetters {
        received: Mutex<Vec<(MessageId, String)>>,
    }

    impl ErrorHandler for DeadLetters {
        fn handle_poison_message<'a>(
            &'a self,
            message: &'a TransportMessage,
            error: &'a (dyn Error + Send + Sync + 'static),
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                self.received
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((message.message_id(), error.to_string()));
            })
        }
    }

    fn poison() -> TransportMessage {
        TransportMessage::new(
            MessageHeaders::new(MessageId::new()),
            "StartImport.v1".into(),
            Vec::new(),
        )
    }

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused by db-7.internal:5432")]
    struct DatabaseDown;

    #[tokio::test]
    async fn test_default_problem_hides_error_text() {
        let poller = DefaultPoller::new();
        let dead_letters = Arc::new(DeadLetters::default());
        let config = PollingConfig::builder(poller.clone()).build().unwrap();
        let bridge = FailureBridge::new(dead_letters.clone(), &config);

        let message = poison();
        bridge.handle_poison_message(&message, &DatabaseDown).await;

        let result = poller.peek(message.message_id(), &[]).await.unwrap();
        assert!(result.is_failure());
        let problem = result.problem.unwrap();
        assert_eq!(problem.status, 500);
        assert_eq!(problem.title, "Technical Error");
        assert!(!problem.detail.unwrap_or_default().contains("db-7"));
        assert_eq!(
            problem.instance,
            Some(format!("/messages/{}", message.message_id()))
        );

        // The wrapped handler still saw the original error.
        let received = dead_letters.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, message.message_id());
        assert!(received[0].1.contains("db-7"));
    }

    #[tokio::test]
    async fn test_problem_factory_decides_what_is_stored() {
        let poller = DefaultPoller::new();
        let config = PollingConfig::builder(poller.clone())
            .problem_factory(|error, message| {
                ProblemDetails::new(
                    "https://api.example.com/problems/unavailable",
                    "Unavailable",
                    503,
                )
                .with_detail(error.to_string())
                .with_extension("message_type", message.message_type.clone())
            })
            .build()
            .unwrap();
        let bridge = FailureBridge::new(Arc::new(DeadLetters::default()), &config);

        let message = poison();
        bridge.handle_poison_message(&message, &DatabaseDown).await;

        let result = poller.peek(message.message_id(), &[]).await.unwrap();
        let problem = result.problem.unwrap();
        assert_eq!(problem.status, 503);
        assert_eq!(
            problem.detail.as_deref(),
            Some("connection refused by db-7.internal:5432")
        );
        assert_eq!(problem.extensions["message_type"], "StartImport.v1");
    }
}
