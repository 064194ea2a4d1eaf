//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Remote webhook call (authn / authz / audit):
//!     → retries.rs (run attempt, classify error through a should-retry predicate)
//!     → backoff.rs (next delay = previous * factor, plus jitter)
//!     → sleep, try again until steps are exhausted
//!
//! Batch delivery and watch draining:
//!     → token_bucket.rs (QPS + burst pacing, async acquire)
//! ```
//!
//! # Design Decisions
//! - Retry loops suspend only the calling task; dropping the future cancels them
//! - The last observed error is returned once steps are exhausted
//! - Token buckets use tokio's clock so paused-time tests are deterministic

pub mod backoff;
pub mod retries;
pub mod token_bucket;

pub use backoff::Backoff;
pub use retries::{with_exponential_backoff, RetryHint};
pub use token_bucket::TokenBucket;
