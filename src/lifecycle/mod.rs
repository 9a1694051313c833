//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (Scheduler::start):
//!     Spawn circuit-breaker maintenance → subscribes to shutdown.rs
//!
//! Stop (Scheduler::shutdown):
//!     Trigger shutdown.rs → maintenance loop exits → task joined
//! ```
//!
//! # Design Decisions
//! - The signal fires at most once; stopping twice is harmless
//! - Stop waits for the task to exit before returning

pub mod shutdown;

pub use shutdown::Shutdown;
