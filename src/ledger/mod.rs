//! Admission ledgers backed by the coordination store.
//!
//! # Data Flow
//! ```text
//! SlotLedger::try_acquire(scope, holder, max, ttl)
//!     → store.acquire_slot (sweep, refresh-or-add, one script)
//!     → SlotGuard ─ drop / release() → detached release_slot with timeout
//!
//! WaitQueueLedger::try_enter(user, max_wait)
//!     → store.increment_wait (bounded sweep, capped increment)
//!     → WaitTicket ─ drop / release() → detached decrement_wait with timeout
//! ```
//!
//! # Design Decisions
//! - The slot membership set is the only concurrency accounting; account
//!   selection reserves into the same sets and hands back a `SlotGuard`
//! - Release is best-effort; TTL expiry is the correctness backstop

pub mod slots;
pub mod wait_queue;

pub use slots::{Scope, SlotGuard, SlotLedger};
pub use wait_queue::{WaitQueueLedger, WaitTicket};
