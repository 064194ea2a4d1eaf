//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, pretty or JSON)
//!     → metrics.rs (counters and histograms through the `metrics` facade)
//!
//! Consumers:
//!     → stdout log aggregation
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never formatted strings, for anything a query filters on
//! - Metric helpers live here so label sets stay consistent across call sites
//! - Recording is a no-op until an exporter is installed

pub mod logging;
pub mod metrics;
