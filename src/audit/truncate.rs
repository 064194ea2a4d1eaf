//! Enforce byte ceilings on events and batches.

use async_trait::async_trait;
use std::sync::Arc;

use super::{handle_plugin_error, AuditError, Backend, Event, Level};
use crate::lifecycle::Signal;

pub const TRUNCATED_ANNOTATION_KEY: &str = "audit.k8s.io/truncated";
const TRUNCATED_ANNOTATION_VALUE: &str = "true";
const PLUGIN_NAME: &str = "truncate";

#[derive(Debug, Clone, Copy)]
pub struct TruncateLimits {
    pub max_batch_size: usize,
    pub max_event_size: usize,
}

/// Splits oversized batches and strips bodies from oversized events.
pub struct TruncateBackend {
    delegate: Arc<dyn Backend>,
    limits: TruncateLimits,
}

impl TruncateBackend {
    pub fn new(delegate: Arc<dyn Backend>, limits: TruncateLimits) -> Self {
        Self { delegate, limits }
    }
}

/// Drop request and response bodies and mark the event.
pub fn truncate(event: &Event) -> Event {
    let mut out = event.clone();
    out.request_object = None;
    out.response_object = None;
    out.log_annotation(TRUNCATED_ANNOTATION_KEY, TRUNCATED_ANNOTATION_VALUE);
    out
}

fn encoded_size(event: &Event) -> Result<usize, AuditError> {
    serde_json::to_vec(event)
        .map(|b| b.len())
        .map_err(|e| AuditError::Log(format!("encoding event: {e}")))
}

#[async_trait]
impl Backend for TruncateBackend {
    async fn process_events(&self, events: &[Arc<Event>]) -> Result<(), AuditError> {
        let mut errors = Vec::new();
        let mut impacted = Vec::new();
        let mut delivery_errors = Vec::new();
        let mut batch: Vec<Arc<Event>> = Vec::new();
        let mut batch_size = 0usize;

        for event in events {
            let mut event = Arc::clone(event);
            let mut size = encoded_size(&event);
            if matches!(size, Ok(s) if s > self.limits.max_event_size)
                && event.level.at_least(Level::Request)
            {
                event = Arc::new(truncate(&event));
                size = encoded_size(&event);
            }
            let size = match size {
                Ok(size) if size <= self.limits.max_event_size => size,
                Ok(_) => {
                    errors.push(AuditError::Log("event is too large even after truncating".into()));
                    impacted.push(event);
                    continue;
                }
                Err(e) => {
                    errors.push(e);
                    impacted.push(event);
                    continue;
                }
            };

            if !batch.is_empty() && batch_size + size > self.limits.max_batch_size {
                if let Err(e) = self.delegate.process_events(&batch).await {
                    delivery_errors.push(e);
                }
                batch.clear();
                batch_size = 0;
            }
            batch_size += size;
            batch.push(event);
        }

        if !batch.is_empty() {
            if let Err(e) = self.delegate.process_events(&batch).await {
                delivery_errors.push(e);
            }
        }

        if let Err(e) = AuditError::aggregate(errors) {
            handle_plugin_error(PLUGIN_NAME, &e, &impacted);
        }
        AuditError::aggregate(delivery_errors)
    }

    fn run(&self, stop: Signal) -> Result<(), AuditError> {
        self.delegate.run(stop)
    }

    async fn shutdown(&self) {
        self.delegate.shutdown().await;
    }

    fn name(&self) -> String {
        format!("{PLUGIN_NAME}<{}>", self.delegate.name())
    }
}
