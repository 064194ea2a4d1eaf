//! Request wait groups used while draining.
//!
//! # Responsibilities
//! - Count in-flight non-long-running requests; refuse new ones once waiting starts
//! - Count active watches; pace their release with a token bucket while draining
//!
//! # Design Decisions
//! - Membership is an RAII guard; dropping it always releases the slot
//! - A watch guard released through [`WatchGuard::done`] waits for a drain
//!   token first, so disconnects are spread over the grace period

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::resilience::TokenBucket;

/// Minimum pace at which watches are released while draining.
pub const MIN_WATCH_DRAIN_QPS: f64 = 200.0;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitGroupError {
    #[error("add with positive delta after Wait is forbidden")]
    Closed,
}

/// Counter shared by both wait groups.
struct Counter {
    count: watch::Sender<usize>,
    closed: AtomicBool,
}

impl Counter {
    fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count,
            closed: AtomicBool::new(false),
        }
    }

    fn add(&self) -> Result<(), WaitGroupError> {
        let mut added = false;
        // The closure runs under the channel's write lock, which `close` also takes.
        self.count.send_if_modified(|count| {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            *count += 1;
            added = true;
            true
        });
        if added {
            Ok(())
        } else {
            Err(WaitGroupError::Closed)
        }
    }

    fn done(&self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }

    fn close(&self) -> usize {
        let mut snapshot = 0;
        self.count.send_if_modified(|count| {
            self.closed.store(true, Ordering::SeqCst);
            snapshot = *count;
            false
        });
        snapshot
    }

    fn get(&self) -> usize {
        *self.count.borrow()
    }

    async fn zero(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

/// Wait group for non-long-running requests.
pub struct SafeWaitGroup {
    counter: Counter,
}

impl SafeWaitGroup {
    pub fn new() -> Self {
        Self {
            counter: Counter::new(),
        }
    }

    /// Register a request. Fails once [`SafeWaitGroup::wait`] has been called.
    pub fn add(self: &Arc<Self>) -> Result<WaitGroupGuard, WaitGroupError> {
        self.counter.add()?;
        Ok(WaitGroupGuard {
            group: Arc::clone(self),
        })
    }

    pub fn count(&self) -> usize {
        self.counter.get()
    }

    /// Refuse further additions and wait for the count to reach zero.
    pub async fn wait(&self) {
        let outstanding = self.counter.close();
        tracing::debug!(outstanding, "Waiting for non-long-running requests");
        self.counter.zero().await;
    }
}

impl Default for SafeWaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot in a [`SafeWaitGroup`]; released on drop.
pub struct WaitGroupGuard {
    group: Arc<SafeWaitGroup>,
}

impl Drop for WaitGroupGuard {
    fn drop(&mut self) {
        self.group.counter.done();
    }
}

struct DrainLimiter {
    bucket: Arc<TokenBucket>,
    deadline: Instant,
}

/// Outcome of draining the watch wait group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Active watches when draining started.
    pub active_before: usize,
    /// Watches still active when draining returned.
    pub active_after: usize,
    /// The grace period elapsed before every watch finished.
    pub timed_out: bool,
}

/// Wait group for watches, released at a bounded rate while draining.
pub struct RateLimitedWaitGroup {
    counter: Counter,
    limiter: Mutex<Option<Arc<DrainLimiter>>>,
}

impl RateLimitedWaitGroup {
    pub fn new() -> Self {
        Self {
            counter: Counter::new(),
            limiter: Mutex::new(None),
        }
    }

    /// Register a watch. Fails once draining has started.
    pub fn add(self: &Arc<Self>) -> Result<WatchGuard, WaitGroupError> {
        self.counter.add()?;
        Ok(WatchGuard {
            group: Some(Arc::clone(self)),
        })
    }

    pub fn count(&self) -> usize {
        self.counter.get()
    }

    fn current_limiter(&self) -> Option<Arc<DrainLimiter>> {
        match self.limiter.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Drain active watches within `grace`.
    ///
    /// Releases are paced at `max(active / grace, min_qps)` per second with a
    /// burst of one. Returns once every watch is gone or `grace` has elapsed.
    pub async fn wait(&self, grace: Duration, min_qps: f64) -> DrainReport {
        let active_before = self.counter.close();
        if grace.is_zero() {
            return DrainReport {
                active_before,
                active_after: self.count(),
                timed_out: false,
            };
        }

        let qps = (active_before as f64 / grace.as_secs_f64()).max(min_qps);
        let deadline = Instant::now() + grace;
        let limiter = Arc::new(DrainLimiter {
            bucket: Arc::new(TokenBucket::new(qps, 1)),
            deadline,
        });
        match self.limiter.lock() {
            Ok(mut guard) => *guard = Some(limiter),
            Err(poisoned) => *poisoned.into_inner() = Some(limiter),
        }
        tracing::info!(active = active_before, qps, grace = ?grace, "Draining watch requests");

        let timed_out = tokio::time::timeout_at(deadline, self.counter.zero())
            .await
            .is_err();
        DrainReport {
            active_before,
            active_after: self.count(),
            timed_out,
        }
    }
}

impl Default for RateLimitedWaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot in a [`RateLimitedWaitGroup`].
pub struct WatchGuard {
    group: Option<Arc<RateLimitedWaitGroup>>,
}

impl WatchGuard {
    /// Release the slot, waiting for a drain token if draining is underway.
    pub async fn done(mut self) {
        if let Some(group) = self.group.take() {
            if let Some(limiter) = group.current_limiter() {
                let _ = tokio::time::timeout_at(limiter.deadline, limiter.bucket.acquire()).await;
            }
            group.counter.done();
        }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(group) = self.group.take() {
            group.counter.done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn safe_wait_group_refuses_after_wait() {
        let wg = Arc::new(SafeWaitGroup::new());
        let guard = wg.add().expect("open group");
        assert_eq!(wg.count(), 1);

        let waiter = {
            let wg = wg.clone();
            tokio::spawn(async move { wg.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        assert_eq!(wg.add().err(), Some(WaitGroupError::Closed));

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait resolves")
            .expect("no panic");
        assert_eq!(wg.count(), 0);
    }

    #[tokio::test]
    async fn empty_group_waits_instantly() {
        let wg = Arc::new(SafeWaitGroup::new());
        tokio::time::timeout(Duration::from_millis(50), wg.wait())
            .await
            .expect("nothing to wait for");
    }

    #[tokio::test(start_paused = true)]
    async fn watch_drain_is_paced() {
        let wg = Arc::new(RateLimitedWaitGroup::new());
        let guards: Vec<_> = (0..4).map(|_| wg.add().expect("open")).collect();

        let waiter = {
            let wg = wg.clone();
            tokio::spawn(async move { wg.wait(Duration::from_secs(10), 2.0).await })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let start = Instant::now();
        for g in guards {
            g.done().await;
        }
        // Burst of one, then 2/s: three more tokens take ~1.5s.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1400), "elapsed {elapsed:?}");

        let report = waiter.await.expect("no panic");
        assert_eq!(report.active_before, 4);
        assert_eq!(report.active_after, 0);
        assert!(!report.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_drain_gives_up_after_grace() {
        let wg = Arc::new(RateLimitedWaitGroup::new());
        let _stuck = wg.add().expect("open");
        let report = wg.wait(Duration::from_secs(3), MIN_WATCH_DRAIN_QPS).await;
        assert!(report.timed_out);
        assert_eq!(report.active_after, 1);
        assert!(wg.add().is_err());
    }

    #[tokio::test]
    async fn zero_grace_returns_immediately() {
        let wg = Arc::new(RateLimitedWaitGroup::new());
        let _stuck = wg.add().expect("open");
        let report = wg.wait(Duration::ZERO, MIN_WATCH_DRAIN_QPS).await;
        assert_eq!(report.active_before, 1);
        assert!(!report.timed_out);
    }
}
