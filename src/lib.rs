//! Multi-tenant account scheduler library.
//!
//! Distributed admission control for a gateway fronting pooled upstream
//! accounts: per-scope concurrency slots, a bounded wait queue, score-based
//! account selection and per-account circuit breaking, coordinated through a
//! shared Redis store.

pub mod config;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod scheduler;
pub mod selection;
pub mod store;

pub use config::schema::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use ledger::{Scope, SlotGuard, WaitTicket};
pub use lifecycle::Shutdown;
pub use scheduler::Scheduler;
pub use selection::{AccountCandidate, AccountReservation};
