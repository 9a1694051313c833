//! Metrics collection.
//!
//! # Metrics
//! - `scheduler_slot_admissions_total` (counter): slot acquisitions by scope, outcome
//! - `scheduler_selections_total` (counter): candidate selections by outcome
//! - `scheduler_wait_queue_admissions_total` (counter): wait-queue entries by outcome
//! - `scheduler_wait_queue_depth` (gauge): last observed global wait depth
//! - `scheduler_circuit_opened_total` (counter): circuits tripped
//! - `scheduler_release_failures_total` (counter): releases left to TTL expiry, by kind

fn outcome(granted: bool) -> &'static str {
    if granted {
        "granted"
    } else {
        "denied"
    }
}

pub fn record_slot_admission(scope: &'static str, granted: bool) {
    ::metrics::counter!(
        "scheduler_slot_admissions_total",
        "scope" => scope,
        "outcome" => outcome(granted)
    )
    .increment(1);
}

/// `outcome` is one of `selected`, `no_capacity`, `all_open`.
pub fn record_selection(outcome: &'static str) {
    ::metrics::counter!("scheduler_selections_total", "outcome" => outcome).increment(1);
}

pub fn record_wait_admission(admitted: bool) {
    ::metrics::counter!(
        "scheduler_wait_queue_admissions_total",
        "outcome" => outcome(admitted)
    )
    .increment(1);
}

pub fn record_wait_depth(depth: u64) {
    ::metrics::gauge!("scheduler_wait_queue_depth").set(depth as f64);
}

pub fn record_circuit_opened() {
    ::metrics::counter!("scheduler_circuit_opened_total").increment(1);
}

pub fn record_release_failure(kind: &'static str) {
    ::metrics::counter!("scheduler_release_failures_total", "kind" => kind).increment(1);
}
