//! Shutdown orchestration: drives the signal cascade from stop request to exit.

use futures_util::future::{join_all, BoxFuture};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use super::signals::{LifecycleSignals, Signal};
use super::waitgroup::{RateLimitedWaitGroup, SafeWaitGroup, MIN_WATCH_DRAIN_QPS};
use crate::audit::{AuditError, Backend};
use crate::config::schema::ShutdownConfig;

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("audit backend failed to start: {0}")]
    Audit(#[from] AuditError),

    #[error("http server: {0}")]
    Server(String),
}

#[derive(Debug, Clone)]
pub struct ShutdownOptions {
    pub shutdown_delay: Duration,
    pub send_retry_after: bool,
    pub watch_termination_grace: Duration,
    pub shutdown_timeout: Duration,
    pub min_watch_drain_qps: f64,
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self::from(&ShutdownConfig::default())
    }
}

impl From<&ShutdownConfig> for ShutdownOptions {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            shutdown_delay: Duration::from_secs(config.shutdown_delay_secs),
            send_retry_after: config.send_retry_after,
            watch_termination_grace: Duration::from_secs(config.watch_termination_grace_secs),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
            min_watch_drain_qps: MIN_WATCH_DRAIN_QPS,
        }
    }
}

/// The per-request view of the lifecycle: signals to read and wait groups to join.
#[derive(Clone)]
pub struct Lifecycle {
    pub signals: LifecycleSignals,
    pub requests: Arc<SafeWaitGroup>,
    pub watches: Arc<RateLimitedWaitGroup>,
    pub send_retry_after: bool,
}

impl Lifecycle {
    pub fn new(send_retry_after: bool) -> Self {
        Self {
            signals: LifecycleSignals::new(),
            requests: Arc::new(SafeWaitGroup::new()),
            watches: Arc::new(RateLimitedWaitGroup::new()),
            send_retry_after,
        }
    }

    /// Whether new requests should be told to come back later.
    pub fn should_retry_after(&self) -> bool {
        self.send_retry_after && self.signals.not_accepting_new_requests.is_signaled()
    }
}

struct PreShutdownHook {
    name: String,
    run: BoxFuture<'static, Result<(), String>>,
}

/// Owns the shutdown cascade. Built once, consumed by [`ShutdownOrchestrator::run`].
pub struct ShutdownOrchestrator {
    options: ShutdownOptions,
    lifecycle: Lifecycle,
    hooks: Vec<PreShutdownHook>,
    audit: Option<Arc<dyn Backend>>,
}

impl ShutdownOrchestrator {
    pub fn new(options: ShutdownOptions) -> Self {
        let lifecycle = Lifecycle::new(options.send_retry_after);
        Self {
            options,
            lifecycle,
            hooks: Vec::new(),
            audit: None,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    pub fn signals(&self) -> &LifecycleSignals {
        &self.lifecycle.signals
    }

    /// Register work that must finish before new requests are refused.
    pub fn add_pre_shutdown_hook<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.hooks.push(PreShutdownHook {
            name: name.into(),
            run: Box::pin(hook),
        });
    }

    pub fn with_audit_backend(mut self, backend: Option<Arc<dyn Backend>>) -> Self {
        self.audit = backend;
        self
    }

    /// The signal on which the HTTP listener should stop accepting.
    ///
    /// In retry-after mode the listener stays open until requests drained so
    /// late clients get a 429 instead of a refused connection.
    pub fn stop_listening_signal(&self) -> Signal {
        let signals = &self.lifecycle.signals;
        if self.options.send_retry_after {
            signals.in_flight_requests_drained.clone()
        } else {
            signals.not_accepting_new_requests.clone()
        }
    }

    /// Start audit delivery. Its background work stops once requests drained.
    pub fn start_audit(&self) -> Result<(), ShutdownError> {
        if let Some(audit) = &self.audit {
            audit.run(self.lifecycle.signals.in_flight_requests_drained.clone())?;
            tracing::info!(backend = %audit.name(), "Audit backend started");
        }
        Ok(())
    }

    /// Wait for `stop`, then walk the cascade to completion.
    pub async fn run<S>(
        self,
        stop: S,
        server: Option<JoinHandle<std::io::Result<()>>>,
    ) -> Result<(), ShutdownError>
    where
        S: Future<Output = ()>,
    {
        let Self {
            options,
            lifecycle,
            hooks,
            audit,
        } = self;
        let signals = &lifecycle.signals;

        stop.await;
        signals.shutdown_initiated.signal();

        let delay = async {
            tokio::time::sleep(options.shutdown_delay).await;
            signals.after_shutdown_delay_duration.signal();
        };
        let hooks = async {
            run_pre_shutdown_hooks(hooks).await;
            signals.pre_shutdown_hooks_stopped.signal();
        };
        tokio::join!(delay, hooks);
        signals.not_accepting_new_requests.signal();

        let non_long_running = async {
            lifecycle.requests.wait().await;
            signals.non_long_running_requests_drained.signal();
        };
        let watches = async {
            let report = lifecycle
                .watches
                .wait(options.watch_termination_grace, options.min_watch_drain_qps)
                .await;
            if report.timed_out {
                tracing::warn!(
                    active_before = report.active_before,
                    remaining = report.active_after,
                    "Watch drain grace period elapsed"
                );
            } else {
                tracing::info!(drained = report.active_before, "Watch requests drained");
            }
            signals.watch_requests_drained.signal();
        };
        tokio::join!(non_long_running, watches);
        signals.in_flight_requests_drained.signal();

        if let Some(audit) = &audit {
            audit.shutdown().await;
            tracing::info!(backend = %audit.name(), "Audit backend shut down");
        }

        let result = match server {
            Some(handle) => wait_for_server(handle, options.shutdown_timeout).await,
            None => Ok(()),
        };
        signals.http_server_stopped_listening.signal();
        result
    }
}

async fn run_pre_shutdown_hooks(hooks: Vec<PreShutdownHook>) {
    let runs = hooks.into_iter().map(|hook| async move {
        match hook.run.await {
            Ok(()) => tracing::info!(hook = %hook.name, "Pre-shutdown hook completed"),
            Err(e) => tracing::error!(hook = %hook.name, error = %e, "Pre-shutdown hook failed"),
        }
    });
    join_all(runs).await;
}

async fn wait_for_server(
    mut handle: JoinHandle<std::io::Result<()>>,
    timeout: Duration,
) -> Result<(), ShutdownError> {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(ShutdownError::Server(e.to_string())),
        Ok(Err(e)) => Err(ShutdownError::Server(e.to_string())),
        Err(_) => {
            tracing::warn!(timeout = ?timeout, "HTTP server did not stop in time, aborting connections");
            handle.abort();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::testing::RecordingBackend;
    use std::sync::atomic::Ordering;

    fn options(delay_ms: u64) -> ShutdownOptions {
        ShutdownOptions {
            shutdown_delay: Duration::from_millis(delay_ms),
            ..ShutdownOptions::default()
        }
    }

    /// Every signal that has fired has all of its predecessors fired too.
    fn assert_cascade_order(signals: &LifecycleSignals) {
        if signals.not_accepting_new_requests.is_signaled() {
            assert!(signals.after_shutdown_delay_duration.is_signaled());
            assert!(signals.pre_shutdown_hooks_stopped.is_signaled());
        }
        if signals.after_shutdown_delay_duration.is_signaled()
            || signals.pre_shutdown_hooks_stopped.is_signaled()
        {
            assert!(signals.shutdown_initiated.is_signaled());
        }
        if signals.non_long_running_requests_drained.is_signaled()
            || signals.watch_requests_drained.is_signaled()
        {
            assert!(signals.not_accepting_new_requests.is_signaled());
        }
        if signals.in_flight_requests_drained.is_signaled() {
            assert!(signals.non_long_running_requests_drained.is_signaled());
            assert!(signals.watch_requests_drained.is_signaled());
        }
        if signals.http_server_stopped_listening.is_signaled() {
            assert!(signals.in_flight_requests_drained.is_signaled());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn not_accepting_waits_for_delay_and_hooks() {
        for _ in 0..20 {
            let delay_ms = fastrand::u64(0..50);
            let hook_ms = fastrand::u64(0..50);
            let mut orchestrator = ShutdownOrchestrator::new(options(delay_ms));
            orchestrator.add_pre_shutdown_hook("slow", async move {
                tokio::time::sleep(Duration::from_millis(hook_ms)).await;
                Ok(())
            });
            let signals = orchestrator.signals().clone();
            let run = tokio::spawn(orchestrator.run(async {}, None));

            for _ in 0..60 {
                assert_cascade_order(&signals);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            run.await.unwrap().unwrap();
            assert_cascade_order(&signals);
            assert!(signals.http_server_stopped_listening.is_signaled());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_hook_still_lets_shutdown_proceed() {
        let mut orchestrator = ShutdownOrchestrator::new(options(10));
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        orchestrator.add_pre_shutdown_hook("gated", async move {
            let _ = released.await;
            Err("flush failed".to_string())
        });
        let signals = orchestrator.signals().clone();
        let run = tokio::spawn(orchestrator.run(async {}, None));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(signals.after_shutdown_delay_duration.is_signaled());
        assert!(!signals.not_accepting_new_requests.is_signaled());

        release.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert!(signals.pre_shutdown_hooks_stopped.is_signaled());
        assert!(signals.not_accepting_new_requests.is_signaled());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_in_flight_request() {
        let orchestrator = ShutdownOrchestrator::new(options(0));
        let lifecycle = orchestrator.lifecycle();
        let guard = lifecycle.requests.add().unwrap();

        let run = tokio::spawn(orchestrator.run(async {}, None));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(lifecycle.signals.not_accepting_new_requests.is_signaled());
        assert!(!lifecycle.signals.in_flight_requests_drained.is_signaled());
        assert!(lifecycle.requests.add().is_err());

        drop(guard);
        run.await.unwrap().unwrap();
        assert!(lifecycle.signals.in_flight_requests_drained.is_signaled());
    }

    #[tokio::test(start_paused = true)]
    async fn watches_are_abandoned_after_grace() {
        let orchestrator = ShutdownOrchestrator::new(ShutdownOptions {
            watch_termination_grace: Duration::from_secs(2),
            ..options(0)
        });
        let lifecycle = orchestrator.lifecycle();
        let _stuck = lifecycle.watches.add().unwrap();

        let started = tokio::time::Instant::now();
        orchestrator.run(async {}, None).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(lifecycle.signals.watch_requests_drained.is_signaled());
    }

    #[tokio::test]
    async fn audit_runs_until_drained_then_shuts_down() {
        let backend = Arc::new(RecordingBackend::default());
        let orchestrator =
            ShutdownOrchestrator::new(options(0)).with_audit_backend(Some(backend.clone()));
        orchestrator.start_audit().unwrap();
        orchestrator.run(async {}, None).await.unwrap();
        assert!(backend.shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_server_is_bounded_by_timeout() {
        let orchestrator = ShutdownOrchestrator::new(options(0));
        let signals = orchestrator.signals().clone();
        let server = tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok::<(), std::io::Error>(())
        });
        orchestrator.run(async {}, Some(server)).await.unwrap();
        assert!(signals.http_server_stopped_listening.is_signaled());
    }

    #[test]
    fn retry_after_mode_keeps_listening_until_drained() {
        let orchestrator = ShutdownOrchestrator::new(ShutdownOptions {
            send_retry_after: true,
            ..ShutdownOptions::default()
        });
        assert_eq!(orchestrator.stop_listening_signal().name(), "InFlightRequestsDrained");
        let orchestrator = ShutdownOrchestrator::new(ShutdownOptions::default());
        assert_eq!(orchestrator.stop_listening_signal().name(), "NotAcceptingNewRequest");
    }
}
