//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff policy shared by every webhook client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub duration: Duration,
    /// Multiplier applied to the delay after every attempt.
    pub factor: f64,
    /// Up to `jitter * delay` is added to each sleep.
    pub jitter: f64,
    /// Total number of attempts, including the first one.
    pub steps: u32,
}

impl Backoff {
    /// 500ms, x1.5, 20% jitter, 5 attempts.
    pub fn webhook_default() -> Self {
        Self {
            duration: Duration::from_millis(500),
            factor: 1.5,
            jitter: 0.2,
            steps: 5,
        }
    }

    /// Same shape as [`Backoff::webhook_default`] with a different first delay.
    pub fn with_initial(duration: Duration) -> Self {
        Self {
            duration,
            ..Self::webhook_default()
        }
    }

    /// Base (un-jittered) delay slept after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let factor = if self.factor > 0.0 { self.factor } else { 1.0 };
        let secs = self.duration.as_secs_f64() * factor.powi(exponent);
        if secs.is_finite() {
            Duration::from_secs_f64(secs)
        } else {
            Duration::MAX
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::webhook_default()
    }
}

/// Add `[0, jitter)` of the delay on top of it.
pub fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let extra = rand::thread_rng().gen_range(0.0..jitter);
    delay.saturating_add(delay.mul_f64(extra))
}
