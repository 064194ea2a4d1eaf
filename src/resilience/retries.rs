//! Retry loop with exponential backoff.
//!
//! # Responsibilities
//! - Run an attempt, consult a should-retry predicate on failure
//! - Sleep the jittered backoff between attempts, or longer when the error
//!   carries a server retry hint
//! - Return the last error once the step budget is spent
//!
//! # Design Decisions
//! - Non-retryable errors fail immediately
//! - The loop holds no shared state; cancelling the caller's future aborts it

use std::future::Future;
use std::time::Duration;

use super::backoff::{jittered, Backoff};

/// Errors that may carry a server-requested delay before the next attempt.
pub trait RetryHint {
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryHint for String {}

/// Run `attempt` until it succeeds, `should_retry` rejects the error, or
/// `backoff.steps` attempts have been made.
pub async fn with_exponential_backoff<T, E, F, Fut, R>(
    backoff: &Backoff,
    should_retry: R,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display + RetryHint,
{
    let steps = backoff.steps.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if tries < steps && should_retry(&err) => {
                let mut delay = jittered(backoff.delay_after(tries), backoff.jitter);
                if let Some(hint) = err.retry_after() {
                    delay = delay.max(hint);
                }
                tracing::debug!(attempt = tries, delay = ?delay, error = %err, "Retrying webhook call");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
