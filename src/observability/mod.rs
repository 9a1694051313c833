//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Ledgers, selector, breaker produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON or pretty)
//!     → Whatever metrics recorder the host process installs
//! ```
//!
//! # Design Decisions
//! - Structured fields (account_id, scope, holder) instead of formatted text
//! - No exporter here; the gateway owns metrics exposition
//! - Recording without an installed recorder is a no-op

pub mod logging;
pub mod metrics;
