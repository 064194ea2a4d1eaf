//! Audit webhook backend: POSTs an `EventList` per batch.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{AuditError, Backend, Event, EventList};
use crate::lifecycle::Signal;
use crate::observability::metrics;
use crate::resilience::Backoff;
use crate::webhook::{retry_on_any_error, GenericWebhook};

const PLUGIN_NAME: &str = "webhook";

/// First retry delay for audit delivery.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(10);

pub struct WebhookBackend {
    client: GenericWebhook,
}

impl WebhookBackend {
    /// Audit delivery retries on every error, not only transient ones.
    pub fn new(client: GenericWebhook) -> Self {
        Self {
            client: client.with_should_retry(retry_on_any_error),
        }
    }

    pub fn from_descriptor_file(path: &Path, initial_backoff: Duration) -> Result<Self, AuditError> {
        let client = GenericWebhook::from_descriptor_file(path, Backoff::with_initial(initial_backoff), "audit")
            .map_err(|e| AuditError::Webhook(e.to_string()))?;
        tracing::info!(url = %client.url(), "Audit webhook enabled");
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Backend for WebhookBackend {
    async fn process_events(&self, events: &[Arc<Event>]) -> Result<(), AuditError> {
        let list = EventList::new(events.iter().map(|e| Event::clone(e)).collect());
        self.client
            .post_ack(&list)
            .await
            .map_err(|e| AuditError::Webhook(e.to_string()))?;
        metrics::record_audit_events(PLUGIN_NAME, events.len());
        Ok(())
    }

    fn run(&self, _stop: Signal) -> Result<(), AuditError> {
        Ok(())
    }

    async fn shutdown(&self) {}

    fn name(&self) -> String {
        PLUGIN_NAME.to_string()
    }
}
