//! Wait-queue ledger: bounded per-user backpressure with a global depth.
//!
//! # Responsibilities
//! - Admit a waiter only while its user is below the per-user cap
//! - Keep `total == sum(per-user counts)` across sweeps and key loss
//! - Purge idle users in bounded batches so no call scans the whole queue
//!
//! # Data Flow
//! ```text
//! increment/decrement → sweep ≤ cleanup_batch idle users → update count + total
//! total_depth         → sweep ≤ depth_cleanup_batch      → recompute if lost → read
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SlotConfig, WaitQueueConfig};
use crate::error::{SchedulerError, SchedulerResult};
use crate::ledger::slots::ttl_secs;
use crate::observability::metrics;
use crate::resilience::timeouts::{release_detached, spawn_release};
use crate::store::{CoordinationStore, KeySpace, WaitQueueKeys};

/// Global wait-queue accounting over a shared coordination store.
#[derive(Clone)]
pub struct WaitQueueLedger {
    store: Arc<dyn CoordinationStore>,
    keys: WaitQueueKeys,
    ttl_secs: u64,
    cleanup_batch: u32,
    depth_cleanup_batch: u32,
    release_timeout: Duration,
}

impl fmt::Debug for WaitQueueLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueueLedger")
            .field("keys", &self.keys)
            .field("ttl_secs", &self.ttl_secs)
            .field("cleanup_batch", &self.cleanup_batch)
            .field("depth_cleanup_batch", &self.depth_cleanup_batch)
            .finish_non_exhaustive()
    }
}

impl WaitQueueLedger {
    /// Idle users expire after the slot TTL.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: &KeySpace,
        slots: &SlotConfig,
        config: &WaitQueueConfig,
    ) -> SchedulerResult<Self> {
        Ok(Self {
            store,
            keys: keys.wait_queue(),
            ttl_secs: ttl_secs(slots.ttl())?,
            cleanup_batch: config.cleanup_batch,
            depth_cleanup_batch: config.depth_cleanup_batch,
            release_timeout: slots.release_timeout(),
        })
    }

    pub fn keys(&self) -> &WaitQueueKeys {
        &self.keys
    }

    fn user_key(user_id: u64) -> SchedulerResult<String> {
        if user_id == 0 {
            return Err(SchedulerError::invalid("user id must be non-zero"));
        }
        Ok(user_id.to_string())
    }

    /// Add one waiter for `user_id` unless it already has `max_wait` waiting.
    pub async fn increment(&self, user_id: u64, max_wait: u32) -> SchedulerResult<bool> {
        let user = Self::user_key(user_id)?;
        let admitted = self
            .store
            .increment_wait(&self.keys, &user, max_wait, self.ttl_secs, self.cleanup_batch)
            .await?;

        metrics::record_wait_admission(admitted);
        if !admitted {
            tracing::debug!(user_id, max_wait, "Wait queue full for user");
        }
        Ok(admitted)
    }

    /// Remove one waiter for `user_id`. Never drives a count below zero.
    pub async fn decrement(&self, user_id: u64) -> SchedulerResult<()> {
        let user = Self::user_key(user_id)?;
        self.store
            .decrement_wait(&self.keys, &user, self.ttl_secs, self.cleanup_batch)
            .await?;
        Ok(())
    }

    /// Global number of waiting requests across every instance.
    pub async fn total_depth(&self) -> SchedulerResult<u64> {
        let depth = self
            .store
            .total_wait(&self.keys, self.ttl_secs, self.depth_cleanup_batch)
            .await?;
        metrics::record_wait_depth(depth);
        Ok(depth)
    }

    /// [`increment`](Self::increment) returning a ticket that leaves the
    /// queue when dropped.
    pub async fn try_enter(&self, user_id: u64, max_wait: u32) -> SchedulerResult<Option<WaitTicket>> {
        if !self.increment(user_id, max_wait).await? {
            return Ok(None);
        }
        Ok(Some(WaitTicket {
            ledger: Some(self.clone()),
            user_id,
        }))
    }

    async fn leave(self, user_id: u64) -> crate::store::StoreResult<()> {
        let user = user_id.to_string();
        self.store
            .decrement_wait(&self.keys, &user, self.ttl_secs, self.cleanup_batch)
            .await
    }
}

/// One admitted waiter. Leaves the queue once, via [`WaitTicket::release`]
/// or on drop.
#[must_use = "dropping the ticket leaves the wait queue immediately"]
pub struct WaitTicket {
    ledger: Option<WaitQueueLedger>,
    user_id: u64,
}

impl fmt::Debug for WaitTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitTicket")
            .field("user_id", &self.user_id)
            .field("released", &self.ledger.is_none())
            .finish()
    }
}

impl WaitTicket {
    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    /// Leave the queue and wait for the store (bounded by the release timeout).
    pub async fn release(mut self) {
        if let Some(ledger) = self.ledger.take() {
            let timeout = ledger.release_timeout;
            release_detached("wait", timeout, ledger.leave(self.user_id)).await;
        }
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            let timeout = ledger.release_timeout;
            let _ = spawn_release("wait", timeout, ledger.leave(self.user_id));
        }
    }
}
