//! Circuit breaker for account isolation.
//!
//! # States
//! - Closed: account has no failure record (or only a stale one)
//! - Open: `failures >= threshold` and the last failure is younger than the
//!   reset timeout; the account is excluded from selection
//!
//! # State Transitions
//! ```text
//! Closed → Open: threshold-th consecutive failure
//! Open → Closed: reset timeout elapses since the last failure (lazy)
//! Any → Closed: a recorded success
//! ```
//!
//! # Design Decisions
//! - Per-account, per-process state; instances do not share failures
//! - No proactive transition: staleness is noticed on the next access
//! - A failure older than the reset timeout is forgiven before counting anew
//! - Hourly maintenance evicts fully expired records to bound memory

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::CircuitBreakerConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::selection::AccountCandidate;

/// Circuit state of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    consecutive: u32,
    last_failure: Instant,
}

struct Maintenance {
    shutdown: Arc<Shutdown>,
    task: JoinHandle<()>,
}

/// Tracks consecutive failures per account and trips at a threshold.
pub struct CircuitBreaker {
    records: RwLock<HashMap<u64, FailureRecord>>,
    threshold: u32,
    reset_timeout: Duration,
    sweep_interval: Duration,
    maintenance: Mutex<Option<Maintenance>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("threshold", &self.threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("tracked", &self.read().len())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            threshold: config.threshold.max(1),
            reset_timeout: config.reset_timeout(),
            sweep_interval: config.sweep_interval().max(Duration::from_secs(1)),
            maintenance: Mutex::new(None),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u64, FailureRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u64, FailureRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, record: &FailureRecord, now: Instant) -> bool {
        now.duration_since(record.last_failure) >= self.reset_timeout
    }

    /// Count one failure for `account_id`.
    pub fn record_failure(&self, account_id: u64) {
        let now = Instant::now();
        let mut records = self.write();

        let record = records.entry(account_id).or_insert(FailureRecord {
            consecutive: 0,
            last_failure: now,
        });
        if self.is_stale(record, now) {
            record.consecutive = 0;
        }
        record.consecutive += 1;
        record.last_failure = now;

        if record.consecutive == self.threshold {
            tracing::warn!(
                account_id,
                failures = record.consecutive,
                reset_timeout_secs = self.reset_timeout.as_secs(),
                "Circuit opened for account"
            );
            metrics::record_circuit_opened();
        }
    }

    /// Clear the record for `account_id`, closing its circuit immediately.
    pub fn record_success(&self, account_id: u64) {
        if self.write().remove(&account_id).is_some() {
            tracing::info!(account_id, "Circuit cleared for account after success");
        }
    }

    /// Whether `account_id` is currently excluded from selection.
    pub fn is_open(&self, account_id: u64) -> bool {
        let now = Instant::now();
        {
            let records = self.read();
            let Some(record) = records.get(&account_id) else {
                return false;
            };
            if !self.is_stale(record, now) {
                return record.consecutive >= self.threshold;
            }
        }

        // Stale: the read lock is released above; re-check under the write lock.
        let mut records = self.write();
        if records
            .get(&account_id)
            .is_some_and(|record| self.is_stale(record, Instant::now()))
        {
            records.remove(&account_id);
        }
        false
    }

    pub fn state(&self, account_id: u64) -> CircuitState {
        if self.is_open(account_id) {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Drop candidates whose circuit is open.
    pub fn filter_closed(&self, candidates: &[AccountCandidate]) -> Vec<AccountCandidate> {
        candidates
            .iter()
            .filter(|c| {
                let open = self.is_open(c.id);
                if open {
                    tracing::debug!(account_id = c.id, "Skipping account with open circuit");
                }
                !open
            })
            .cloned()
            .collect()
    }

    /// Number of accounts with a failure record, stale or not.
    pub fn tracked_accounts(&self) -> usize {
        self.read().len()
    }

    /// Evict every record whose last failure is older than the reset timeout.
    /// Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut records = self.write();
        let before = records.len();
        records.retain(|_, record| !self.is_stale(record, now));
        let evicted = before - records.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = records.len(), "Circuit breaker sweep");
        }
        evicted
    }

    fn maintenance_slot(&self) -> std::sync::MutexGuard<'_, Option<Maintenance>> {
        self.maintenance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the periodic sweep. Calling it while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.maintenance_slot();
        if slot.is_some() {
            return;
        }

        let shutdown = Arc::new(Shutdown::new());
        let mut stop = shutdown.subscribe();
        let breaker = Arc::downgrade(self);
        let period = self.sweep_interval;

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match breaker.upgrade() {
                            Some(breaker) => {
                                breaker.sweep();
                            }
                            None => break,
                        }
                    }
                    _ = stop.recv() => break,
                }
            }
            tracing::debug!("Circuit breaker maintenance stopped");
        });

        tracing::debug!(interval_secs = period.as_secs(), "Circuit breaker maintenance started");
        *slot = Some(Maintenance { shutdown, task });
    }

    /// Stop the periodic sweep and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let maintenance = self.maintenance_slot().take();
        let Some(Maintenance { shutdown, task }) = maintenance else {
            return;
        };
        shutdown.trigger();
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Circuit breaker maintenance task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.maintenance_slot().is_some()
    }
}
