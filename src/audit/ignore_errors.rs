use async_trait::async_trait;
use std::sync::Arc;

use super::{handle_plugin_error, AuditError, Backend, Event};
use crate::lifecycle::Signal;

/// Swallows delivery errors after logging them.
pub struct IgnoreErrorsBackend {
    delegate: Arc<dyn Backend>,
}

impl IgnoreErrorsBackend {
    pub fn new(delegate: Arc<dyn Backend>) -> Self {
        Self { delegate }
    }
}

#[async_trait]
impl Backend for IgnoreErrorsBackend {
    async fn process_events(&self, events: &[Arc<Event>]) -> Result<(), AuditError> {
        if let Err(e) = self.delegate.process_events(events).await {
            handle_plugin_error(&self.delegate.name(), &e, events);
        }
        Ok(())
    }

    fn run(&self, stop: Signal) -> Result<(), AuditError> {
        self.delegate.run(stop)
    }

    async fn shutdown(&self) {
        self.delegate.shutdown().await;
    }

    fn name(&self) -> String {
        format!("ignoreErrors<{}>", self.delegate.name())
    }
}
