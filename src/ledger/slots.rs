//! Slot ledger: TTL-based concurrency counting per scope.
//!
//! # Responsibilities
//! - Grant at most `max_concurrency` live slots per scope across all instances
//! - Refresh, not duplicate, a slot re-acquired with the same holder token
//! - Expire unreleased slots passively on the next operation on the scope
//! - Hand out guards that release exactly once, off the caller's cancellation
//!
//! # Design Decisions
//! - Membership set per scope (holder → store timestamp), swept lazily
//! - Holder tokens must be unique per concurrent reservation; a shared token
//!   collapses reservations into one slot
//! - Store errors are surfaced; a failed release is left to the TTL

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};
use crate::observability::metrics;
use crate::resilience::timeouts::{release_detached, spawn_release};
use crate::store::{CoordinationStore, KeySpace};

/// Admission-control unit a concurrency cap applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Account(u64),
    User(u64),
}

impl Scope {
    pub fn id(&self) -> u64 {
        match self {
            Scope::Account(id) | Scope::User(id) => *id,
        }
    }

    /// Label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Scope::Account(_) => "account",
            Scope::User(_) => "user",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

pub(crate) fn validate_scope(scope: Scope) -> SchedulerResult<()> {
    if scope.id() == 0 {
        return Err(SchedulerError::invalid(format!("{} id must be non-zero", scope.kind())));
    }
    Ok(())
}

pub(crate) fn validate_holder(holder: &str) -> SchedulerResult<()> {
    if holder.is_empty() {
        return Err(SchedulerError::invalid("holder token must not be empty"));
    }
    Ok(())
}

pub(crate) fn ttl_secs(ttl: Duration) -> SchedulerResult<u64> {
    match ttl.as_secs() {
        0 => Err(SchedulerError::invalid("slot ttl must be at least one second")),
        secs => Ok(secs),
    }
}

/// Per-scope concurrency ledger over a shared coordination store.
#[derive(Clone)]
pub struct SlotLedger {
    store: Arc<dyn CoordinationStore>,
    keys: KeySpace,
    release_timeout: Duration,
}

impl fmt::Debug for SlotLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLedger")
            .field("keys", &self.keys)
            .field("release_timeout", &self.release_timeout)
            .finish_non_exhaustive()
    }
}

impl SlotLedger {
    pub fn new(store: Arc<dyn CoordinationStore>, keys: KeySpace, release_timeout: Duration) -> Self {
        Self {
            store,
            keys,
            release_timeout,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub(crate) fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Try to take one slot of `scope` for `holder`.
    ///
    /// Re-acquiring with a held token refreshes it and reports granted.
    pub async fn acquire(
        &self,
        scope: Scope,
        holder: &str,
        max_concurrency: u32,
        ttl: Duration,
    ) -> SchedulerResult<bool> {
        validate_scope(scope)?;
        validate_holder(holder)?;
        let ttl = ttl_secs(ttl)?;

        let key = self.keys.slot_key(scope);
        let granted = self
            .store
            .acquire_slot(&key, holder, max_concurrency, ttl)
            .await?;

        metrics::record_slot_admission(scope.kind(), granted);
        if !granted {
            tracing::debug!(%scope, holder, max_concurrency, "Slot denied: scope at capacity");
        }
        Ok(granted)
    }

    /// Like [`acquire`](Self::acquire) but returns a guard that releases the
    /// slot when dropped.
    pub async fn try_acquire(
        &self,
        scope: Scope,
        holder: &str,
        max_concurrency: u32,
        ttl: Duration,
    ) -> SchedulerResult<Option<SlotGuard>> {
        if self.acquire(scope, holder, max_concurrency, ttl).await? {
            Ok(Some(self.guard(scope, holder)))
        } else {
            Ok(None)
        }
    }

    /// Release `holder`'s slot in `scope`.
    ///
    /// Runs on its own task with the release timeout; failures are logged and
    /// the slot is left to expire. Releasing twice is harmless.
    pub async fn release(&self, scope: Scope, holder: &str) {
        let store = self.store.clone();
        let key = self.keys.slot_key(scope);
        let holder = holder.to_string();
        release_detached("slot", self.release_timeout, async move {
            store.release_slot(&key, &holder).await
        })
        .await;
    }

    /// Live slot count of `scope` after sweeping expired entries.
    pub async fn count(&self, scope: Scope, ttl: Duration) -> SchedulerResult<u32> {
        validate_scope(scope)?;
        let ttl = ttl_secs(ttl)?;
        Ok(self.store.slot_count(&self.keys.slot_key(scope), ttl).await?)
    }

    /// Drop every slot of `scope`. Maintenance only: in-flight holders lose
    /// their reservations.
    pub async fn reset(&self, scope: Scope) -> SchedulerResult<()> {
        validate_scope(scope)?;
        self.store.clear_slots(&self.keys.slot_key(scope)).await?;
        tracing::info!(%scope, "Slot set reset");
        Ok(())
    }

    pub(crate) fn guard(&self, scope: Scope, holder: &str) -> SlotGuard {
        SlotGuard {
            pending: Some(PendingRelease {
                store: self.store.clone(),
                key: self.keys.slot_key(scope),
                holder: holder.to_string(),
                timeout: self.release_timeout,
            }),
            scope,
        }
    }
}

struct PendingRelease {
    store: Arc<dyn CoordinationStore>,
    key: String,
    holder: String,
    timeout: Duration,
}

impl PendingRelease {
    fn into_task(self) -> (Duration, impl std::future::Future<Output = crate::store::StoreResult<()>>) {
        let PendingRelease {
            store,
            key,
            holder,
            timeout,
        } = self;
        (timeout, async move { store.release_slot(&key, &holder).await })
    }
}

/// A held slot. Released once, either by [`SlotGuard::release`] or on drop.
#[must_use = "dropping the guard releases the slot immediately"]
pub struct SlotGuard {
    pending: Option<PendingRelease>,
    scope: Scope,
}

impl fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotGuard")
            .field("scope", &self.scope)
            .field("holder", &self.holder())
            .field("released", &self.pending.is_none())
            .finish()
    }
}

impl SlotGuard {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn holder(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.holder.as_str())
    }

    /// Release now and wait for the store to acknowledge (or the release
    /// timeout to pass). Cancelling this future does not cancel the release.
    pub async fn release(mut self) {
        if let Some(pending) = self.pending.take() {
            let (timeout, work) = pending.into_task();
            release_detached("slot", timeout, work).await;
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            let (timeout, work) = pending.into_task();
            let _ = spawn_release("slot", timeout, work);
        }
    }
}
