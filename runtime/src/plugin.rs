//! Installs polling into a pipeline.

use crate::config::PollingConfig;
use crate::dispatcher::CompletionDispatcher;
use crate::failure::FailureBridge;
use msgpoll_core::pipeline::{ErrorHandler, Pipeline};
use std::sync::Arc;

/// Wires a [`PollingConfig`] into a [`Pipeline`].
///
/// `install` registers a [`CompletionDispatcher`] as the handler of every
/// correlated event type and as a completion listener, and wraps the pipeline's
/// error handler in a [`FailureBridge`].
#[derive(Debug, Clone)]
pub struct PollingPlugin {
    config: Arc<PollingConfig>,
}

impl PollingPlugin {
    /// Create a plugin for `config`.
    #[must_use]
    pub fn new(config: PollingConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The configuration installed by this plugin.
    #[must_use]
    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Install into `pipeline`.
    ///
    /// Returns the dispatcher that was registered.
    pub fn install<P: Pipeline + ?Sized>(&self, pipeline: &mut P) -> Arc<CompletionDispatcher> {
        let dispatcher = Arc::new(CompletionDispatcher::new(
            Arc::clone(&self.config),
            pipeline.bus(),
        ));

        for message_type in self.config.correlations().message_types() {
            pipeline.register_handler(message_type, dispatcher.clone());
        }
        pipeline.add_completion_listener(dispatcher.clone());

        let config = Arc::clone(&self.config);
        pipeline.wrap_error_handler(Box::new(move |inner| {
            Arc::new(FailureBridge::new(inner, &config)) as Arc<dyn ErrorHandler>
        }));

        tracing::info!(
            correlated_types = self.config.correlations().len(),
            auto_publish = self.config.auto_publish_completion_events(),
            "Polling installed"
        );
        dispatcher
    }
}

impl PollingConfig {
    /// Plugin installing this configuration.
    #[must_use]
    pub fn plugin(self) -> PollingPlugin {
        PollingPlugin::new(self)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::DefaultPoller;
    use crate::config::SuccessfulCompletionCorrelation;
    use msgpoll_core::message::{Message, MessageCompletedEvent, TransportMessage};
    use msgpoll_core::pipeline::{
        BusError, CompletionListener, ErrorHandlerDecorator, MessageBus, MessageHandler,
    };
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::error::Error;
    use std::future::Future;
    use std::pin::Pin;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ImportFinished;

    impl Message for ImportFinished {
        const MESSAGE_TYPE: &'static str = "ImportFinished.v1";
    }

    struct NullBus;

    impl MessageBus for NullBus {
        fn publish(
            &self,
            _message: TransportMessage,
        ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct NullErrorHandler;

    impl ErrorHandler for NullErrorHandler {
        fn handle_poison_message<'a>(
            &'a self,
            _message: &'a TransportMessage,
            _error: &'a (dyn Error + Send + Sync + 'static),
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async {})
        }
    }

    /// Records registrations without dispatching anything.
    struct RegistrationLog {
        handlers: HashMap<String, usize>,
        listeners: usize,
        error_handler: Arc<dyn ErrorHandler>,
    }

    impl Pipeline for RegistrationLog {
        fn bus(&self) -> Arc<dyn MessageBus> {
            Arc::new(NullBus)
        }

        fn register_handler(&mut self, message_type: &str, _handler: Arc<dyn MessageHandler>) {
            *self.handlers.entry(message_type.to_string()).or_default() += 1;
        }

        fn add_completion_listener(&mut self, _listener: Arc<dyn CompletionListener>) {
            self.listeners += 1;
        }

        fn wrap_error_handler(&mut self, decorate: ErrorHandlerDecorator<'_>) {
            self.error_handler = decorate(Arc::clone(&self.error_handler));
        }
    }

    #[test]
    fn test_install_registers_every_correlated_type() {
        let config = PollingConfig::builder(DefaultPoller::new())
            .succeeded(SuccessfulCompletionCorrelation::<ImportFinished>::new())
            .build()
            .unwrap();
        let mut pipeline = RegistrationLog {
            handlers: HashMap::new(),
            listeners: 0,
            error_handler: Arc::new(NullErrorHandler),
        };

        let dispatcher = config.plugin().install(&mut pipeline);

        assert_eq!(
            pipeline.handlers.get(ImportFinished::MESSAGE_TYPE),
            Some(&1)
        );
        assert_eq!(
            pipeline.handlers.get(MessageCompletedEvent::MESSAGE_TYPE),
            Some(&1)
        );
        assert_eq!(pipeline.handlers.len(), 2);
        assert_eq!(pipeline.listeners, 1);
        assert!(dispatcher.config().auto_publish_completion_events());
    }
}
