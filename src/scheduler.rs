//! Scheduler facade.
//!
//! # Responsibilities
//! - Build the ledgers, selector and circuit breaker from one config
//! - Apply the configured slot TTL and wait-queue cap to every call
//! - Run the request control flow: drop open circuits, then select and reserve
//! - Own the breaker maintenance lifecycle
//!
//! # Data Flow
//! ```text
//! select_account(candidates, holder)
//!     → CircuitBreaker::filter_closed
//!     → CandidateSelector::select_and_acquire (one store script)
//!     → AccountReservation (release on drop)
//! caller forwards the request, then record_success / record_failure
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::ledger::{Scope, SlotGuard, SlotLedger, WaitQueueLedger, WaitTicket};
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, CircuitState};
use crate::selection::scoring::seed_from_holder;
use crate::selection::{AccountCandidate, AccountReservation, CandidateSelector};
use crate::store::{CoordinationStore, KeySpace, RedisStore};

/// Multi-tenant account scheduler.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    slot_ttl: Duration,
    slots: SlotLedger,
    wait_queue: WaitQueueLedger,
    selector: CandidateSelector,
    breaker: Arc<CircuitBreaker>,
}

impl Scheduler {
    /// Connect to the configured Redis store.
    pub async fn connect(config: SchedulerConfig) -> SchedulerResult<Self> {
        let store = RedisStore::connect(&config.store).await?;
        Self::new(config, Arc::new(store))
    }

    /// Build over any coordination store.
    pub fn new(config: SchedulerConfig, store: Arc<dyn CoordinationStore>) -> SchedulerResult<Self> {
        let keys = KeySpace::new(config.store.key_prefix.clone());
        let slots = SlotLedger::new(store.clone(), keys.clone(), config.slots.release_timeout());
        let wait_queue = WaitQueueLedger::new(store, &keys, &config.slots, &config.wait_queue)?;
        let selector = CandidateSelector::new(slots.clone(), config.selection.weights());
        let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));

        Ok(Self {
            slot_ttl: config.slots.ttl(),
            config,
            slots,
            wait_queue,
            selector,
            breaker,
        })
    }

    /// Start background maintenance. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        self.breaker.start();
        tracing::info!(
            slot_ttl_secs = self.slot_ttl.as_secs(),
            breaker_threshold = self.config.circuit_breaker.threshold,
            "Scheduler started"
        );
    }

    /// Stop background maintenance and wait for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        self.breaker.stop().await;
        tracing::info!("Scheduler stopped");
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn slot_ttl(&self) -> Duration {
        self.slot_ttl
    }

    pub fn slots(&self) -> &SlotLedger {
        &self.slots
    }

    pub fn wait_queue(&self) -> &WaitQueueLedger {
        &self.wait_queue
    }

    pub fn selector(&self) -> &CandidateSelector {
        &self.selector
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    // === Slots ===

    pub async fn acquire_account_slot(
        &self,
        account_id: u64,
        holder: &str,
        max_concurrency: u32,
    ) -> SchedulerResult<Option<SlotGuard>> {
        self.slots
            .try_acquire(Scope::Account(account_id), holder, max_concurrency, self.slot_ttl)
            .await
    }

    pub async fn acquire_user_slot(
        &self,
        user_id: u64,
        holder: &str,
        max_concurrency: u32,
    ) -> SchedulerResult<Option<SlotGuard>> {
        self.slots
            .try_acquire(Scope::User(user_id), holder, max_concurrency, self.slot_ttl)
            .await
    }

    /// Release by token, for callers that did not keep the guard.
    pub async fn release_account_slot(&self, account_id: u64, holder: &str) {
        self.slots.release(Scope::Account(account_id), holder).await;
    }

    pub async fn release_user_slot(&self, user_id: u64, holder: &str) {
        self.slots.release(Scope::User(user_id), holder).await;
    }

    pub async fn account_concurrency(&self, account_id: u64) -> SchedulerResult<u32> {
        self.slots.count(Scope::Account(account_id), self.slot_ttl).await
    }

    pub async fn user_concurrency(&self, user_id: u64) -> SchedulerResult<u32> {
        self.slots.count(Scope::User(user_id), self.slot_ttl).await
    }

    /// Drop every reservation on `account_id`.
    pub async fn reset_account_concurrency(&self, account_id: u64) -> SchedulerResult<()> {
        self.slots.reset(Scope::Account(account_id)).await
    }

    // === Wait queue ===

    /// Enter the wait queue under the configured per-user cap.
    pub async fn enter_wait_queue(&self, user_id: u64) -> SchedulerResult<Option<WaitTicket>> {
        self.wait_queue
            .try_enter(user_id, self.config.wait_queue.max_per_user)
            .await
    }

    pub async fn wait_queue_depth(&self) -> SchedulerResult<u64> {
        self.wait_queue.total_depth().await
    }

    // === Selection ===

    /// Pick an account for `holder` among candidates whose circuit is closed
    /// and reserve a slot on it. `Ok(None)` means no account is available.
    pub async fn select_account(
        &self,
        candidates: &[AccountCandidate],
        holder: &str,
    ) -> SchedulerResult<Option<AccountReservation>> {
        self.select_account_seeded(candidates, holder, seed_from_holder(holder))
            .await
    }

    pub async fn select_account_seeded(
        &self,
        candidates: &[AccountCandidate],
        holder: &str,
        seed: u64,
    ) -> SchedulerResult<Option<AccountReservation>> {
        if candidates.is_empty() {
            return Err(SchedulerError::invalid("no candidates provided"));
        }

        let closed = self.breaker.filter_closed(candidates);
        if closed.is_empty() {
            metrics::record_selection("all_open");
            tracing::warn!(
                candidates = candidates.len(),
                "Every candidate account has an open circuit"
            );
            return Ok(None);
        }

        self.selector
            .select_and_acquire_seeded(&closed, holder, self.slot_ttl, seed)
            .await
    }

    // === Circuit breaker ===

    pub fn record_success(&self, account_id: u64) {
        self.breaker.record_success(account_id);
    }

    pub fn record_failure(&self, account_id: u64) {
        self.breaker.record_failure(account_id);
    }

    pub fn circuit_state(&self, account_id: u64) -> CircuitState {
        self.breaker.state(account_id)
    }
}
