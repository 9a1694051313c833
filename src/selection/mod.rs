//! Account selection subsystem.
//!
//! # Data Flow
//! ```text
//! candidates (from the account policy)
//!     → Scheduler drops open circuits (resilience::CircuitBreaker)
//!     → selector.rs
//!         - scoring.rs: seed → jitter per candidate
//!         - store.select_slot: sweep, count, score, rank, reserve (atomic)
//!     → AccountReservation { account_id, concurrency, SlotGuard }
//! ```
//!
//! # Design Decisions
//! - Lower score wins; ties go to the earlier candidate
//! - "No account" is `Ok(None)`, never an error

pub mod candidate;
pub mod scoring;
pub mod selector;

pub use candidate::{AccountCandidate, ParseCandidateError};
pub use scoring::ScoreWeights;
pub use selector::{AccountReservation, CandidateSelector};
