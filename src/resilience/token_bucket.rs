//! Token bucket pacing.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_update: Instant,
}

/// A token bucket refilled at `qps` tokens per second, holding at most `burst`.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    /// Create a bucket that starts full.
    pub fn new(qps: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_update: Instant::now(),
            }),
            capacity,
            refill_rate: qps,
        }
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.take_or_wait().is_none()
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        while let Some(wait) = self.take_or_wait() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Takes a token, or reports how long until one is refilled.
    fn take_or_wait(&self) -> Option<Duration> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_update = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else if self.refill_rate <= 0.0 {
            Some(Duration::from_secs(1))
        } else {
            let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate);
            Some(wait.max(Duration::from_millis(1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_then_paced() {
        let bucket = TokenBucket::new(10.0, 2);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        let start = Instant::now();
        bucket.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(99), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(110), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn refills_up_to_capacity() {
        let bucket = TokenBucket::new(100.0, 3);
        for _ in 0..3 {
            assert!(bucket.try_acquire());
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        for _ in 0..3 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }
}
