//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use account_scheduler::store::{
    CoordinationStore, ManualClock, MemoryStore, SelectedSlot, SlotSelection, StoreError,
    StoreResult, WaitQueueKeys,
};
use account_scheduler::{Scheduler, SchedulerConfig};
use async_trait::async_trait;

pub const START_SECS: u64 = 1_700_000_000;

/// Default config with a short release deadline.
pub fn test_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.slots.release_timeout_secs = 1;
    config
}

/// Scheduler over a fresh in-process store driven by a manual clock.
pub fn manual_scheduler(config: SchedulerConfig) -> (Scheduler, Arc<MemoryStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START_SECS));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let scheduler = Scheduler::new(config, store.clone()).unwrap();
    (scheduler, store, clock)
}

/// Two schedulers sharing one store, standing in for two gateway instances.
pub fn instance_pair(config: SchedulerConfig) -> (Arc<Scheduler>, Arc<Scheduler>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let a = Scheduler::new(config.clone(), store.clone()).unwrap();
    let b = Scheduler::new(config, store.clone()).unwrap();
    (Arc::new(a), Arc::new(b), store)
}

/// Store wrapper that injects faults into a working in-process store.
#[derive(Debug, Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    /// Every call fails as if the store were unreachable.
    pub unavailable: AtomicBool,
    /// Only releases fail.
    pub fail_releases: AtomicBool,
    /// Releases never complete.
    pub hang_releases: AtomicBool,
    pub calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        let store = Self::default();
        store.unavailable.store(true, Ordering::SeqCst);
        store
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout(Duration::from_secs(3)));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for FaultyStore {
    async fn acquire_slot(
        &self,
        key: &str,
        holder: &str,
        max_concurrency: u32,
        ttl_secs: u64,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.acquire_slot(key, holder, max_concurrency, ttl_secs).await
    }

    async fn release_slot(&self, key: &str, holder: &str) -> StoreResult<()> {
        self.check()?;
        if self.hang_releases.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(StoreError::UnexpectedReply("connection reset".into()));
        }
        self.inner.release_slot(key, holder).await
    }

    async fn slot_count(&self, key: &str, ttl_secs: u64) -> StoreResult<u32> {
        self.check()?;
        self.inner.slot_count(key, ttl_secs).await
    }

    async fn clear_slots(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.clear_slots(key).await
    }

    async fn select_slot(
        &self,
        selection: &SlotSelection<'_>,
    ) -> StoreResult<Option<SelectedSlot>> {
        self.check()?;
        self.inner.select_slot(selection).await
    }

    async fn increment_wait(
        &self,
        keys: &WaitQueueKeys,
        user: &str,
        max_wait: u32,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner
            .increment_wait(keys, user, max_wait, ttl_secs, cleanup_limit)
            .await
    }

    async fn decrement_wait(
        &self,
        keys: &WaitQueueKeys,
        user: &str,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<()> {
        self.check()?;
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(StoreError::UnexpectedReply("connection reset".into()));
        }
        self.inner.decrement_wait(keys, user, ttl_secs, cleanup_limit).await
    }

    async fn total_wait(
        &self,
        keys: &WaitQueueKeys,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<u64> {
        self.check()?;
        self.inner.total_wait(keys, ttl_secs, cleanup_limit).await
    }
}
