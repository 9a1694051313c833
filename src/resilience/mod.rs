//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Account outcome observed by the caller:
//!     → circuit_breaker.rs (count consecutive failures, open at threshold)
//!     → Scheduler drops open accounts before selection
//!
//! Reservation finished or abandoned:
//!     → timeouts.rs (detached release with its own deadline)
//!     → on failure: log, count, let the TTL expire it
//! ```
//!
//! # Design Decisions
//! - Failure isolation is per instance; each process trusts what it observed
//! - Releases never block or fail the caller

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
