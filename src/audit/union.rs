use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;

use super::{AuditError, Backend, Event};
use crate::lifecycle::Signal;

/// Delivers every batch to all backends concurrently.
pub struct UnionBackend {
    backends: Vec<Arc<dyn Backend>>,
}

impl UnionBackend {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    /// Collapse a single backend to itself.
    pub fn of(mut backends: Vec<Arc<dyn Backend>>) -> Arc<dyn Backend> {
        if backends.len() == 1 {
            if let Some(only) = backends.pop() {
                return only;
            }
        }
        Arc::new(Self::new(backends))
    }
}

#[async_trait]
impl Backend for UnionBackend {
    async fn process_events(&self, events: &[Arc<Event>]) -> Result<(), AuditError> {
        let results = join_all(self.backends.iter().map(|b| b.process_events(events))).await;
        AuditError::aggregate(results.into_iter().filter_map(Result::err).collect())
    }

    fn run(&self, stop: Signal) -> Result<(), AuditError> {
        let errors = self
            .backends
            .iter()
            .filter_map(|b| b.run(stop.clone()).err())
            .collect();
        AuditError::aggregate(errors)
    }

    async fn shutdown(&self) {
        join_all(self.backends.iter().map(|b| b.shutdown())).await;
    }

    fn name(&self) -> String {
        let names: Vec<String> = self.backends.iter().map(|b| b.name()).collect();
        format!("union[{}]", names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::testing::{event, RecordingBackend};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn failure_is_isolated() {
        let ok = Arc::new(RecordingBackend::default());
        let bad = Arc::new(RecordingBackend::failing());
        let union = UnionBackend::new(vec![bad.clone(), ok.clone()]);

        let result = union.process_events(&[event("a"), event("b")]).await;
        assert!(result.is_err());
        assert_eq!(ok.count(), 2);
        assert_eq!(bad.batches.load(Ordering::SeqCst), 1);

        union.shutdown().await;
        assert!(ok.shut_down.load(Ordering::SeqCst));
        assert!(bad.shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn all_succeeding_is_ok() {
        let a = Arc::new(RecordingBackend::default());
        let b = Arc::new(RecordingBackend::default());
        let union = UnionBackend::new(vec![a.clone(), b.clone()]);
        assert_eq!(union.process_events(&[event("x")]).await, Ok(()));
        assert_eq!(union.name(), "union[recording,recording]");
    }
}
