//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via `metrics`)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape), when enabled
//! ```
//!
//! # Design Decisions
//! - Connection id travels as a structured field on every connection event
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
