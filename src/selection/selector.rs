//! Candidate selector: score accounts and reserve a slot on the best one.
//!
//! # Responsibilities
//! - Rank candidates by priority, live load and seeded jitter
//! - Reserve into the winner's slot set in the same atomic step as the ranking
//! - Report "no account" as an outcome, not an error
//!
//! # Design Decisions
//! - Reservations live in the account slot sets of [`SlotLedger`]; there is no
//!   second counter, so selection and direct slot acquisition agree on load
//! - Jitter is drawn client-side from an explicit seed and passed to the store
//! - A holder that already occupies one of the candidates keeps that slot

use std::fmt;
use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};
use crate::ledger::slots::{ttl_secs, validate_holder, validate_scope};
use crate::ledger::{Scope, SlotGuard, SlotLedger};
use crate::observability::metrics;
use crate::selection::candidate::AccountCandidate;
use crate::selection::scoring::{jitter_values, seed_from_holder, ScoreWeights};
use crate::store::{ScoredSlot, SlotSelection, StoreError};

/// A slot reserved on the selected account.
#[must_use = "dropping the reservation releases the slot immediately"]
pub struct AccountReservation {
    pub account_id: u64,
    /// Live concurrency of the account including this reservation.
    pub concurrency: u32,
    guard: SlotGuard,
}

impl fmt::Debug for AccountReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountReservation")
            .field("account_id", &self.account_id)
            .field("concurrency", &self.concurrency)
            .field("guard", &self.guard)
            .finish()
    }
}

impl AccountReservation {
    pub fn guard(&self) -> &SlotGuard {
        &self.guard
    }

    pub fn into_guard(self) -> SlotGuard {
        self.guard
    }

    /// Release the slot and wait for the store to acknowledge.
    pub async fn release(self) {
        self.guard.release().await;
    }
}

/// Picks one account per request and reserves a slot on it.
#[derive(Debug, Clone)]
pub struct CandidateSelector {
    slots: SlotLedger,
    weights: ScoreWeights,
}

impl CandidateSelector {
    pub fn new(slots: SlotLedger, weights: ScoreWeights) -> Self {
        Self { slots, weights }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Select with jitter seeded from the holder token.
    pub async fn select_and_acquire(
        &self,
        candidates: &[AccountCandidate],
        holder: &str,
        ttl: Duration,
    ) -> SchedulerResult<Option<AccountReservation>> {
        self.select_and_acquire_seeded(candidates, holder, ttl, seed_from_holder(holder))
            .await
    }

    /// Select with an explicit jitter seed. The same seed, candidates and
    /// loads always rank the same way.
    pub async fn select_and_acquire_seeded(
        &self,
        candidates: &[AccountCandidate],
        holder: &str,
        ttl: Duration,
        seed: u64,
    ) -> SchedulerResult<Option<AccountReservation>> {
        if candidates.is_empty() {
            return Err(SchedulerError::invalid("no candidates provided"));
        }
        validate_holder(holder)?;
        let ttl_secs = ttl_secs(ttl)?;
        for candidate in candidates {
            validate_scope(Scope::Account(candidate.id))?;
        }

        let jitter = jitter_values(seed, candidates.len());
        let selection = SlotSelection {
            holder,
            ttl_secs,
            weights: self.weights,
            candidates: candidates
                .iter()
                .zip(jitter)
                .map(|(candidate, jitter)| ScoredSlot {
                    key: self.slots.keys().slot_key(Scope::Account(candidate.id)),
                    priority: candidate.priority,
                    max_concurrency: candidate.max_concurrency,
                    jitter,
                })
                .collect(),
        };

        let Some(selected) = self.slots.store().select_slot(&selection).await? else {
            metrics::record_selection("no_capacity");
            tracing::debug!(
                candidates = candidates.len(),
                holder,
                "No candidate account has spare capacity"
            );
            return Ok(None);
        };

        let candidate = candidates.get(selected.index).ok_or_else(|| {
            StoreError::UnexpectedReply(format!(
                "selected index {} out of {} candidates",
                selected.index,
                candidates.len()
            ))
        })?;

        metrics::record_selection("selected");
        tracing::debug!(
            account_id = candidate.id,
            concurrency = selected.concurrency,
            max_concurrency = candidate.max_concurrency,
            holder,
            "Account selected"
        );

        Ok(Some(AccountReservation {
            account_id: candidate.id,
            concurrency: selected.concurrency,
            guard: self.slots.guard(Scope::Account(candidate.id), holder),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::store::{KeySpace, MemoryStore};

    const TTL: Duration = Duration::from_secs(60);

    fn selector() -> (CandidateSelector, SlotLedger) {
        let store = Arc::new(MemoryStore::new());
        let slots = SlotLedger::new(store, KeySpace::default(), Duration::from_secs(5));
        (CandidateSelector::new(slots.clone(), ScoreWeights::default()), slots)
    }

    fn by_priority() -> Vec<AccountCandidate> {
        vec![
            AccountCandidate::new(1, 2, 10),
            AccountCandidate::new(2, 1, 10),
            AccountCandidate::new(3, 3, 10),
        ]
    }

    #[tokio::test]
    async fn test_lowest_priority_value_wins() {
        let (selector, _) = selector();
        for seed in 0..20 {
            let holder = format!("req-{seed}");
            let reservation = selector
                .select_and_acquire_seeded(&by_priority(), &holder, TTL, seed)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reservation.account_id, 2);
            reservation.release().await;
        }
    }

    #[tokio::test]
    async fn test_reservation_counts_in_slot_set() {
        let (selector, slots) = selector();
        let reservation = selector
            .select_and_acquire(&by_priority(), "req-1", TTL)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reservation.concurrency, 1);
        assert_eq!(slots.count(Scope::Account(2), TTL).await.unwrap(), 1);

        reservation.release().await;
        assert_eq!(slots.count(Scope::Account(2), TTL).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_saturated_candidate_is_skipped() {
        let (selector, slots) = selector();
        assert!(slots.acquire(Scope::Account(1), "other", 1, TTL).await.unwrap());

        let candidates = vec![AccountCandidate::new(1, 0, 1), AccountCandidate::new(2, 9, 10)];
        let reservation = selector
            .select_and_acquire(&candidates, "req-1", TTL)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reservation.account_id, 2);
    }

    #[tokio::test]
    async fn test_all_saturated_returns_none_without_mutation() {
        let (selector, slots) = selector();
        slots.acquire(Scope::Account(1), "a", 1, TTL).await.unwrap();
        slots.acquire(Scope::Account(2), "b", 1, TTL).await.unwrap();

        let candidates = vec![AccountCandidate::new(1, 0, 1), AccountCandidate::new(2, 0, 1)];
        let result = selector.select_and_acquire(&candidates, "req-1", TTL).await.unwrap();
        assert!(result.is_none());
        assert_eq!(slots.count(Scope::Account(1), TTL).await.unwrap(), 1);
        assert_eq!(slots.count(Scope::Account(2), TTL).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_load_spreads_equal_priorities() {
        let (selector, _) = selector();
        let candidates = vec![AccountCandidate::new(1, 0, 2), AccountCandidate::new(2, 0, 2)];
        let mut held = Vec::new();
        for i in 0..4 {
            held.push(
                selector
                    .select_and_acquire(&candidates, &format!("req-{i}"), TTL)
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        let on_first = held.iter().filter(|r| r.account_id == 1).count();
        assert_eq!(on_first, 2);
        assert!(selector
            .select_and_acquire(&candidates, "req-4", TTL)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_retry_keeps_existing_slot() {
        let (selector, slots) = selector();
        let candidates = vec![AccountCandidate::new(1, 0, 5), AccountCandidate::new(2, 0, 5)];
        let first = selector
            .select_and_acquire_seeded(&candidates, "req-1", TTL, 1)
            .await
            .unwrap()
            .unwrap();
        let second = selector
            .select_and_acquire_seeded(&candidates, "req-1", TTL, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.account_id, second.account_id);
        assert_eq!(slots.count(Scope::Account(first.account_id), TTL).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_seed_same_choice() {
        let candidates = vec![
            AccountCandidate::new(1, 0, 5),
            AccountCandidate::new(2, 0, 5),
            AccountCandidate::new(3, 0, 5),
        ];
        let mut picks = Vec::new();
        for _ in 0..3 {
            let (selector, _) = selector();
            let r = selector
                .select_and_acquire_seeded(&candidates, "req-1", TTL, 77)
                .await
                .unwrap()
                .unwrap();
            picks.push(r.account_id);
        }
        assert!(picks.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let (selector, _) = selector();
        let err = selector.select_and_acquire(&[], "req-1", TTL).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid argument: no candidates provided");

        let err = selector
            .select_and_acquire(&[AccountCandidate::new(0, 0, 1)], "req-1", TTL)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));
    }
}
