//! Request admission and lifecycle control plane for API servers.
//!
//! Every request is authenticated, optionally impersonated, audited and
//! authorized before it reaches the API router; shutdown drains requests
//! and watches through an ordered cascade of one-shot signals.

// Decision makers
pub mod audit;
pub mod authn;
pub mod authz;
pub mod webhook;

// Serving
pub mod api;
pub mod health;
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::GateConfig;
pub use http::{Components, GateServer, ServerError};
pub use lifecycle::{Lifecycle, LifecycleSignals, Signal};
