//! Coordination store subsystem.
//!
//! # Data Flow
//! ```text
//! Ledger / selector operation
//!     → keys.rs (scope → key names)
//!     → CoordinationStore (one atomic script per call)
//!         - redis.rs  (Lua scripts, server clock via TIME)
//!         - memory.rs (single-process keyspace, injectable clock)
//!     → typed reply (granted / count / selected slot)
//! ```
//!
//! # Design Decisions
//! - One trait method per script; no method is check-then-act on the client
//! - Timestamps come from the store's clock, never the caller's
//! - Transport errors are returned as-is; the store never guesses grant/deny

pub mod keys;
pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::selection::scoring::ScoreWeights;

pub use keys::{KeySpace, WaitQueueKeys};
pub use memory::{Clock, ManualClock, MemoryStore, SystemClock};
pub use self::redis::RedisStore;

/// Errors talking to the coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport or server error from Redis.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The command did not complete within the configured deadline.
    #[error("store command timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered with something the script contract does not allow.
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One candidate slot set as seen by the selection script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSlot {
    /// Membership set key of the candidate's scope.
    pub key: String,
    pub priority: i32,
    pub max_concurrency: u32,
    /// Pre-drawn jitter in `[0, 1)`.
    pub jitter: f64,
}

/// Input of the atomic select-and-reserve script.
#[derive(Debug, Clone)]
pub struct SlotSelection<'a> {
    pub holder: &'a str,
    pub ttl_secs: u64,
    pub weights: ScoreWeights,
    pub candidates: Vec<ScoredSlot>,
}

/// Slot reserved by the selection script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedSlot {
    /// Index into [`SlotSelection::candidates`].
    pub index: usize,
    /// Live slot count of the chosen scope including this reservation.
    pub concurrency: u32,
}

/// Shared key/value store with atomic script execution.
///
/// Every method is one linearizable operation against the store, so callers
/// in the same process and callers in other gateway instances observe the
/// same check-then-act outcome.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Sweep expired members of `key`, then refresh `holder` if present or add
    /// it when fewer than `max_concurrency` members remain.
    async fn acquire_slot(
        &self,
        key: &str,
        holder: &str,
        max_concurrency: u32,
        ttl_secs: u64,
    ) -> StoreResult<bool>;

    /// Remove `holder` from `key`. Removing an absent member is not an error.
    async fn release_slot(&self, key: &str, holder: &str) -> StoreResult<()>;

    /// Sweep expired members of `key` and return the live cardinality.
    async fn slot_count(&self, key: &str, ttl_secs: u64) -> StoreResult<u32>;

    /// Drop the whole membership set of `key`.
    async fn clear_slots(&self, key: &str) -> StoreResult<()>;

    /// Score every candidate against its live count and reserve `holder` on
    /// the best one with spare capacity. `None` when every candidate is full.
    async fn select_slot(&self, selection: &SlotSelection<'_>)
        -> StoreResult<Option<SelectedSlot>>;

    /// Bounded idle sweep, then admit one more waiter for `user` when the
    /// user is below `max_wait`.
    async fn increment_wait(
        &self,
        keys: &WaitQueueKeys,
        user: &str,
        max_wait: u32,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<bool>;

    /// Bounded idle sweep, then remove one waiter for `user`, flooring at zero.
    async fn decrement_wait(
        &self,
        keys: &WaitQueueKeys,
        user: &str,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<()>;

    /// Bounded idle sweep, recompute the total if its key was lost, and
    /// return the global wait depth clamped at zero.
    async fn total_wait(
        &self,
        keys: &WaitQueueKeys,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<u64>;
}
