//! The handler chain, one `from_fn_with_state` filter per concern.
//!
//! Outermost first:
//! ```text
//! recover_panics → request_info → shutdown_gate → request_deadline
//!     → authenticate → impersonate → audit → authorize → handler
//! ```

pub mod audit;
pub mod authentication;
pub mod authorization;
pub mod deadline;
pub mod impersonation;
pub mod panic;
pub mod shutdown;

pub use audit::{audit, AUDIT_ID_HEADER};
pub use authentication::authenticate;
pub use authorization::authorize;
pub use deadline::request_deadline;
pub use impersonation::{impersonate, OriginalUser};
pub use panic::{recover_panics, resolve_request_info};
pub use shutdown::{shutdown_gate, ServerShutdownSignal};
