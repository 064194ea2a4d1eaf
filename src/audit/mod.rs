//! Audit pipeline.
//!
//! # Data Flow
//! ```text
//! request attributes
//!     → PolicyChecker (level + omitted stages, decided once)
//!     → AuditContext (one event per request, snapshotted per stage)
//!     → backend chain, per configured sink:
//!         truncate? → mode wrapper (batch: Buffered | blocking: IgnoreErrors | strict: as is)
//!             → Log or Webhook
//!     → Union over the sinks
//! ```
//!
//! # Design Decisions
//! - Backends take shared `Arc<Event>` slices; nothing downstream mutates an event
//! - `process_events` reports delivery failures as `Err`; only the
//!   blocking-strict mode lets one reach the request
//! - Background work starts in `run` and is stopped by a lifecycle signal,
//!   then flushed by `shutdown`

pub mod buffered;
pub mod context;
pub mod event;
pub mod ignore_errors;
pub mod log;
pub mod options;
pub mod policy;
pub mod rotate;
pub mod truncate;
pub mod union;
pub mod webhook;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::lifecycle::Signal;

pub use context::AuditContext;
pub use event::{Event, EventList, Level, Stage};
pub use options::build_backend;
pub use policy::{PolicyChecker, RuleEvaluator};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit policy: {0}")]
    Policy(String),

    #[error("audit log: {0}")]
    Log(String),

    #[error("audit webhook: {0}")]
    Webhook(String),

    #[error("audit buffer: {0}")]
    Buffer(String),

    #[error("audit backend {0} already started")]
    AlreadyRunning(String),

    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Aggregate(Vec<AuditError>),
}

impl AuditError {
    pub fn aggregate(mut errors: Vec<AuditError>) -> Result<(), AuditError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(AuditError::Aggregate(errors)),
        }
    }
}

/// A sink for audit events.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Hand events to the sink. `Err` means they were not delivered.
    async fn process_events(&self, events: &[Arc<Event>]) -> Result<(), AuditError>;

    /// Start background delivery. Must be called once, before serving.
    fn run(&self, stop: Signal) -> Result<(), AuditError>;

    /// Flush what is left. Called once, after requests drained.
    async fn shutdown(&self);

    fn name(&self) -> String;
}

/// Log a delivery failure for events that are being given up on.
pub(crate) fn handle_plugin_error(plugin: &str, err: &AuditError, events: &[Arc<Event>]) {
    tracing::error!(plugin, error = %err, count = events.len(), "Audit events lost");
    for event in events {
        tracing::debug!(
            plugin,
            audit_id = %event.audit_id,
            stage = %event.stage,
            uri = %event.request_uri,
            "Lost audit event"
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording backends for the unit tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    pub struct RecordingBackend {
        pub events: Mutex<Vec<Arc<Event>>>,
        pub batches: AtomicUsize,
        pub fail: AtomicBool,
        pub shut_down: AtomicBool,
        /// Sleep inside `process_events`, simulating a slow sink.
        pub delay: Mutex<Option<Duration>>,
    }

    impl RecordingBackend {
        pub fn failing() -> Self {
            let backend = Self::default();
            backend.fail.store(true, Ordering::SeqCst);
            backend
        }

        pub fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn process_events(&self, events: &[Arc<Event>]) -> Result<(), AuditError> {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.batches.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuditError::Webhook("sink unavailable".into()));
            }
            self.events.lock().unwrap().extend(events.iter().cloned());
            Ok(())
        }

        fn run(&self, _stop: Signal) -> Result<(), AuditError> {
            Ok(())
        }

        async fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }

        fn name(&self) -> String {
            "recording".to_string()
        }
    }

    pub fn event(id: &str) -> Arc<Event> {
        Arc::new(Event::new(id, Level::Metadata))
    }
}
