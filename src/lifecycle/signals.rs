//! One-shot lifecycle signals and OS signal handling.
//!
//! # Responsibilities
//! - Named, broadcast, one-shot flags that any number of tasks can await
//! - The fixed set of signals that make up the shutdown cascade
//! - Translate SIGTERM/SIGINT into the first signal of that cascade

use std::sync::Arc;
use tokio::sync::watch;

use crate::observability::metrics;

/// A named flag that goes from unsignaled to signaled exactly once.
#[derive(Clone)]
pub struct Signal {
    name: &'static str,
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    /// Create an unsignaled signal.
    pub fn new(name: &'static str) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            name,
            tx: Arc::new(tx),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fire the signal. Returns `false` if it had already fired.
    pub fn signal(&self) -> bool {
        let fired = self.tx.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        });
        if fired {
            tracing::info!(signal = self.name, "Lifecycle signal fired");
            metrics::record_lifecycle_signal(self.name);
        }
        fired
    }

    pub fn is_signaled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired. Resolves immediately if it already has.
    pub async fn signaled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// The signals of the shutdown cascade, in dependency order.
#[derive(Debug, Clone)]
pub struct LifecycleSignals {
    /// Stop was requested. Readiness starts failing.
    pub shutdown_initiated: Signal,
    /// The configured shutdown delay has elapsed after initiation.
    pub after_shutdown_delay_duration: Signal,
    /// Every pre-shutdown hook has returned.
    pub pre_shutdown_hooks_stopped: Signal,
    /// Both of the above. New requests are refused or told to retry.
    pub not_accepting_new_requests: Signal,
    /// The non-long-running wait group reached zero.
    pub non_long_running_requests_drained: Signal,
    /// Watches finished or the grace period ran out.
    pub watch_requests_drained: Signal,
    /// Both drains are done.
    pub in_flight_requests_drained: Signal,
    /// The HTTP listener stopped accepting connections.
    pub http_server_stopped_listening: Signal,
}

impl LifecycleSignals {
    pub fn new() -> Self {
        Self {
            shutdown_initiated: Signal::new("ShutdownInitiated"),
            after_shutdown_delay_duration: Signal::new("AfterShutdownDelayDuration"),
            pre_shutdown_hooks_stopped: Signal::new("PreShutdownHooksStopped"),
            not_accepting_new_requests: Signal::new("NotAcceptingNewRequest"),
            non_long_running_requests_drained: Signal::new("NonLongRunningRequestsDrained"),
            watch_requests_drained: Signal::new("WatchRequestsDrained"),
            in_flight_requests_drained: Signal::new("InFlightRequestsDrained"),
            http_server_stopped_listening: Signal::new("HTTPServerStoppedListening"),
        }
    }
}

impl Default for LifecycleSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve on the first SIGINT (Ctrl+C) or SIGTERM.
pub async fn termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Interrupt received, starting graceful shutdown"),
        _ = terminate => tracing::info!("SIGTERM received, starting graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fires_exactly_once() {
        let s = Signal::new("test");
        assert!(!s.is_signaled());
        assert!(s.signal());
        assert!(!s.signal());
        assert!(s.is_signaled());
    }

    #[tokio::test]
    async fn many_waiters_observe_signal() {
        let s = Signal::new("test");
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let s = s.clone();
            waiters.push(tokio::spawn(async move { s.signaled().await }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        s.signal();
        for w in waiters {
            tokio::time::timeout(Duration::from_secs(1), w)
                .await
                .expect("waiter should resolve")
                .expect("waiter should not panic");
        }
    }

    #[tokio::test]
    async fn late_waiter_resolves_immediately() {
        let s = Signal::new("test");
        s.signal();
        tokio::time::timeout(Duration::from_millis(50), s.signaled())
            .await
            .expect("already fired");
    }
}
