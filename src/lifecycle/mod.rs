//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! SIGTERM/SIGINT (signals.rs)
//!     → ShutdownInitiated                      readyz starts failing
//!     → AfterShutdownDelayDuration ∧ PreShutdownHooksStopped
//!     → NotAcceptingNewRequest                 listener stops, or 429s in retry-after mode
//!     → NonLongRunningRequestsDrained ∧ WatchRequestsDrained (waitgroup.rs)
//!     → InFlightRequestsDrained                audit backend flushed
//!     → HTTPServerStoppedListening             server task joined within shutdown_timeout
//! ```
//!
//! # Design Decisions
//! - Each signal fires once and is observable by any number of waiters
//! - The orchestrator is the only writer of signals; filters and health
//!   endpoints only read them
//! - Watches drain at a bounded pace and are abandoned after the grace period

pub mod shutdown;
pub mod signals;
pub mod waitgroup;

pub use shutdown::{Lifecycle, ShutdownError, ShutdownOptions, ShutdownOrchestrator};
pub use signals::{termination, LifecycleSignals, Signal};
pub use waitgroup::{RateLimitedWaitGroup, SafeWaitGroup, WaitGroupError, WaitGroupGuard, WatchGuard};
