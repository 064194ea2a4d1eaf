//! Health endpoints of the gate itself.
//!
//! # Data Flow
//! ```text
//! GET /healthz | /livez | /readyz [?verbose] [?exclude=<check>]
//!     → run each registered HealthCheck (checks.rs)
//!     → 200 "ok" or 500 with the failed checks listed (endpoints.rs)
//! ```
//!
//! # Design Decisions
//! - Readiness fails from `ShutdownInitiated` while liveness stays green,
//!   so load balancers stop routing before connections are refused
//! - Endpoints are mounted outside the handler chain: no authentication,
//!   no audit, no shutdown gating

pub mod checks;
pub mod endpoints;

pub use checks::{HealthCheck, PingCheck, ShutdownCheck};
pub use endpoints::{health_router, HealthChecks};
