//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tracing, Audit-ID propagation)
//!     → /healthz /livez /readyz, outside the chain
//!     → middleware/ (panic → request info → shutdown gate → deadline
//!                    → authentication → impersonation → audit → authorization)
//!     → API router
//!     → response.rs (Status bodies for every refusal)
//! ```

pub mod middleware;
pub mod request_info;
pub mod response;
pub mod server;

pub use request_info::{RequestInfo, RequestInfoResolver};
pub use server::{ChainState, Components, GateServer, ServerError};
