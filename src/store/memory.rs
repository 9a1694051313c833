//! In-process coordination store.
//!
//! # Responsibilities
//! - Run the same scripts as the Redis backend against a local keyspace
//! - Expire keys lazily on access, like the server does for `EXPIRE`
//! - Take `now` from an injectable clock so TTL behaviour is testable
//!
//! # Design Decisions
//! - One mutex around the whole keyspace: each script is atomic by holding it
//! - Only coordinates callers that share this value; use Redis across instances

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::selection::scoring::rank;
use crate::store::{
    CoordinationStore, SelectedSlot, SlotSelection, StoreError, StoreResult, WaitQueueKeys,
};

/// Source of the store's notion of "now", in whole seconds.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_secs(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    pub fn new(start_secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(start_secs),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.secs.fetch_add(by.as_secs(), Ordering::SeqCst);
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
enum Value {
    Counter(i64),
    SortedSet(HashMap<String, u64>),
    Hash(HashMap<String, i64>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::UnexpectedReply(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

impl Keyspace {
    fn evict_if_expired(&mut self, key: &str, now: u64) {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.entries.remove(key);
        }
    }

    fn expire(&mut self, key: &str, ttl_secs: u64, now: u64) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(now + ttl_secs);
        }
    }

    fn zset(&mut self, key: &str, now: u64) -> StoreResult<Option<&mut HashMap<String, u64>>> {
        self.evict_if_expired(key, now);
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => Ok(Some(set)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn zset_or_default(&mut self, key: &str, now: u64) -> StoreResult<&mut HashMap<String, u64>> {
        self.evict_if_expired(key, now);
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::SortedSet(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::SortedSet(set) => Ok(set),
            _ => Err(wrong_type(key)),
        }
    }

    fn hash(&mut self, key: &str, now: u64) -> StoreResult<Option<&mut HashMap<String, i64>>> {
        self.evict_if_expired(key, now);
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(Some(hash)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash_or_default(&mut self, key: &str, now: u64) -> StoreResult<&mut HashMap<String, i64>> {
        self.evict_if_expired(key, now);
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Hash(hash) => Ok(hash),
            _ => Err(wrong_type(key)),
        }
    }

    fn counter(&mut self, key: &str, now: u64) -> StoreResult<Option<i64>> {
        self.evict_if_expired(key, now);
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Counter(v),
                ..
            }) => Ok(Some(*v)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set_counter(&mut self, key: &str, value: i64, now: u64) {
        self.evict_if_expired(key, now);
        let expires_at = self.entries.get(key).and_then(|e| e.expires_at);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Counter(value),
                expires_at,
            },
        );
    }

    fn add_counter(&mut self, key: &str, delta: i64, now: u64) -> StoreResult<i64> {
        let next = self.counter(key, now)?.unwrap_or(0) + delta;
        self.set_counter(key, next, now);
        Ok(next)
    }

    fn remove_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|e| &e.value) {
            Some(Value::SortedSet(set)) => set.is_empty(),
            Some(Value::Hash(hash)) => hash.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    /// `ZREMRANGEBYSCORE key -inf expire_before` followed by `ZCARD`.
    fn sweep_slots(&mut self, key: &str, ttl_secs: u64, now: u64) -> StoreResult<u32> {
        let expire_before = now.saturating_sub(ttl_secs);
        let live = match self.zset(key, now)? {
            Some(set) => {
                set.retain(|_, ts| *ts > expire_before);
                set.len()
            }
            None => 0,
        };
        self.remove_if_empty(key);
        Ok(u32::try_from(live).unwrap_or(u32::MAX))
    }

    fn add_slot(&mut self, key: &str, holder: &str, ttl_secs: u64, now: u64) -> StoreResult<()> {
        self.zset_or_default(key, now)?.insert(holder.to_string(), now);
        self.expire(key, ttl_secs, now);
        Ok(())
    }

    fn holds_slot(&mut self, key: &str, holder: &str, now: u64) -> StoreResult<bool> {
        Ok(self
            .zset(key, now)?
            .is_some_and(|set| set.contains_key(holder)))
    }

    /// Purge at most `limit` users idle since before `now - ttl`, oldest first,
    /// subtracting their counts from the total.
    fn sweep_idle_waiters(
        &mut self,
        keys: &WaitQueueKeys,
        ttl_secs: u64,
        limit: u32,
        now: u64,
    ) -> StoreResult<()> {
        let expire_before = now.saturating_sub(ttl_secs);
        let mut idle: Vec<(u64, String)> = match self.zset(&keys.updated, now)? {
            Some(set) => set
                .iter()
                .filter(|(_, ts)| **ts <= expire_before)
                .map(|(user, ts)| (*ts, user.clone()))
                .collect(),
            None => return Ok(()),
        };
        idle.sort();
        idle.truncate(limit as usize);

        for (_, user) in idle {
            let count = self
                .hash(&keys.counts, now)?
                .and_then(|counts| counts.remove(&user))
                .unwrap_or(0);
            if count > 0 {
                self.add_counter(&keys.total, -count, now)?;
            }
            if let Some(set) = self.zset(&keys.updated, now)? {
                set.remove(&user);
            }
        }
        self.remove_if_empty(&keys.counts);
        self.remove_if_empty(&keys.updated);
        Ok(())
    }

    fn keep_wait_keys(&mut self, keys: &WaitQueueKeys, ttl_secs: u64, now: u64) {
        let keep = ttl_secs * 2;
        self.expire(&keys.total, keep, now);
        self.expire(&keys.updated, keep, now);
        self.expire(&keys.counts, keep, now);
    }

    /// Recreate a lost total from the per-user counts.
    fn ensure_total(&mut self, keys: &WaitQueueKeys, now: u64) -> StoreResult<()> {
        if self.counter(&keys.total, now)?.is_none() {
            let sum = self
                .hash(&keys.counts, now)?
                .map(|counts| counts.values().sum())
                .unwrap_or(0);
            self.set_counter(&keys.total, sum, now);
        }
        Ok(())
    }
}

/// Coordination store living in this process.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    keyspace: Arc<Mutex<Keyspace>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store driven by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            keyspace: Arc::new(Mutex::new(Keyspace::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `DEL key`. Returns whether the key existed.
    pub fn delete_key(&self, key: &str) -> bool {
        let now = self.clock.now_secs();
        let mut ks = self.lock();
        ks.evict_if_expired(key, now);
        ks.entries.remove(key).is_some()
    }

    /// `EXISTS key`.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now_secs();
        let mut ks = self.lock();
        ks.evict_if_expired(key, now);
        ks.entries.contains_key(key)
    }

    /// `HGET counts user` for wait-queue inspection.
    pub fn wait_count(&self, keys: &WaitQueueKeys, user: &str) -> i64 {
        let now = self.clock.now_secs();
        let mut ks = self.lock();
        match ks.hash(&keys.counts, now) {
            Ok(Some(counts)) => counts.get(user).copied().unwrap_or(0),
            _ => 0,
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn acquire_slot(
        &self,
        key: &str,
        holder: &str,
        max_concurrency: u32,
        ttl_secs: u64,
    ) -> StoreResult<bool> {
        let now = self.clock.now_secs();
        let mut ks = self.lock();
        let live = ks.sweep_slots(key, ttl_secs, now)?;

        if ks.holds_slot(key, holder, now)? || live < max_concurrency {
            ks.add_slot(key, holder, ttl_secs, now)?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn release_slot(&self, key: &str, holder: &str) -> StoreResult<()> {
        let now = self.clock.now_secs();
        let mut ks = self.lock();
        if let Some(set) = ks.zset(key, now)? {
            set.remove(holder);
        }
        ks.remove_if_empty(key);
        Ok(())
    }

    async fn slot_count(&self, key: &str, ttl_secs: u64) -> StoreResult<u32> {
        let now = self.clock.now_secs();
        self.lock().sweep_slots(key, ttl_secs, now)
    }

    async fn clear_slots(&self, key: &str) -> StoreResult<()> {
        self.lock().entries.remove(key);
        Ok(())
    }

    async fn select_slot(
        &self,
        selection: &SlotSelection<'_>,
    ) -> StoreResult<Option<SelectedSlot>> {
        let now = self.clock.now_secs();
        let mut ks = self.lock();

        let mut live = Vec::with_capacity(selection.candidates.len());
        let mut scores = Vec::with_capacity(selection.candidates.len());
        for candidate in &selection.candidates {
            let count = ks.sweep_slots(&candidate.key, selection.ttl_secs, now)?;
            scores.push(selection.weights.score(
                candidate.priority,
                count,
                candidate.max_concurrency,
                candidate.jitter,
            ));
            live.push(count);
        }

        // A retried holder keeps the slot it already has.
        for (index, candidate) in selection.candidates.iter().enumerate() {
            if ks.holds_slot(&candidate.key, selection.holder, now)? {
                ks.add_slot(&candidate.key, selection.holder, selection.ttl_secs, now)?;
                return Ok(Some(SelectedSlot {
                    index,
                    concurrency: live[index],
                }));
            }
        }

        for index in rank(&scores) {
            let candidate = &selection.candidates[index];
            if live[index] < candidate.max_concurrency {
                ks.add_slot(&candidate.key, selection.holder, selection.ttl_secs, now)?;
                return Ok(Some(SelectedSlot {
                    index,
                    concurrency: live[index] + 1,
                }));
            }
        }
        Ok(None)
    }

    async fn increment_wait(
        &self,
        keys: &WaitQueueKeys,
        user: &str,
        max_wait: u32,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<bool> {
        let now = self.clock.now_secs();
        let mut ks = self.lock();
        ks.ensure_total(keys, now)?;
        ks.sweep_idle_waiters(keys, ttl_secs, cleanup_limit, now)?;

        let current = ks
            .hash(&keys.counts, now)?
            .and_then(|counts| counts.get(user).copied())
            .unwrap_or(0);
        if current >= i64::from(max_wait) {
            return Ok(false);
        }

        ks.hash_or_default(&keys.counts, now)?
            .insert(user.to_string(), current + 1);
        ks.zset_or_default(&keys.updated, now)?
            .insert(user.to_string(), now);
        ks.add_counter(&keys.total, 1, now)?;
        ks.keep_wait_keys(keys, ttl_secs, now);
        Ok(true)
    }

    async fn decrement_wait(
        &self,
        keys: &WaitQueueKeys,
        user: &str,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<()> {
        let now = self.clock.now_secs();
        let mut ks = self.lock();
        ks.ensure_total(keys, now)?;
        ks.sweep_idle_waiters(keys, ttl_secs, cleanup_limit, now)?;

        let current = ks
            .hash(&keys.counts, now)?
            .and_then(|counts| counts.get(user).copied())
            .unwrap_or(0);
        if current <= 0 {
            return Ok(());
        }

        if current - 1 <= 0 {
            if let Some(counts) = ks.hash(&keys.counts, now)? {
                counts.remove(user);
            }
            if let Some(updated) = ks.zset(&keys.updated, now)? {
                updated.remove(user);
            }
            ks.remove_if_empty(&keys.counts);
            ks.remove_if_empty(&keys.updated);
        } else {
            ks.hash_or_default(&keys.counts, now)?
                .insert(user.to_string(), current - 1);
            ks.zset_or_default(&keys.updated, now)?
                .insert(user.to_string(), now);
        }
        let total = ks.add_counter(&keys.total, -1, now)?;
        if total < 0 {
            ks.set_counter(&keys.total, 0, now);
        }
        ks.keep_wait_keys(keys, ttl_secs, now);
        Ok(())
    }

    async fn total_wait(
        &self,
        keys: &WaitQueueKeys,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<u64> {
        let now = self.clock.now_secs();
        let mut ks = self.lock();

        ks.ensure_total(keys, now)?;
        ks.sweep_idle_waiters(keys, ttl_secs, cleanup_limit, now)?;
        ks.keep_wait_keys(keys, ttl_secs, now);

        let total = ks.counter(&keys.total, now)?.unwrap_or(0);
        if total < 0 {
            ks.set_counter(&keys.total, 0, now);
            return Ok(0);
        }
        Ok(total as u64)
    }
}
