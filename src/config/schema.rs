//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the scheduler.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::selection::scoring::ScoreWeights;

/// Slot TTL applied when the configured value is zero.
pub const DEFAULT_SLOT_TTL_MINUTES: u64 = 15;

/// Root configuration for the scheduler.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Coordination store connection.
    pub store: StoreConfig,

    /// Slot ledger settings.
    pub slots: SlotConfig,

    /// Wait-queue settings.
    pub wait_queue: WaitQueueConfig,

    /// Candidate scoring weights.
    pub selection: SelectionConfig,

    /// Per-account circuit breaker.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// Coordination store connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL (e.g., "redis://127.0.0.1:6379/0").
    pub url: String,

    /// Namespace prepended to every key; empty for none.
    pub key_prefix: String,

    /// Deadline for a single store round trip in seconds.
    pub command_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: String::new(),
            command_timeout_secs: 3,
        }
    }
}

impl StoreConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

/// Slot ledger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SlotConfig {
    /// Lifetime of an unreleased slot in minutes (0 = default of 15).
    pub ttl_minutes: u64,

    /// Deadline for a background release in seconds.
    pub release_timeout_secs: u64,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: DEFAULT_SLOT_TTL_MINUTES,
            release_timeout_secs: 5,
        }
    }
}

impl SlotConfig {
    /// Effective slot TTL; also the idle TTL of wait-queue users.
    pub fn ttl(&self) -> Duration {
        let minutes = if self.ttl_minutes == 0 {
            DEFAULT_SLOT_TTL_MINUTES
        } else {
            self.ttl_minutes
        };
        Duration::from_secs(minutes * 60)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_secs(self.release_timeout_secs)
    }
}

/// Wait-queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WaitQueueConfig {
    /// Requests a single user may have waiting before outright rejection.
    pub max_per_user: u32,

    /// Idle users purged per increment/decrement.
    pub cleanup_batch: u32,

    /// Idle users purged per depth query.
    pub depth_cleanup_batch: u32,
}

impl Default for WaitQueueConfig {
    fn default() -> Self {
        Self {
            max_per_user: 20,
            cleanup_batch: 200,
            depth_cleanup_batch: 500,
        }
    }
}

/// Candidate scoring weights.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub priority_weight: f64,
    pub load_weight: f64,
    pub jitter_weight: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        let weights = ScoreWeights::default();
        Self {
            priority_weight: weights.priority,
            load_weight: weights.load,
            jitter_weight: weights.jitter,
        }
    }
}

impl SelectionConfig {
    pub fn weights(&self) -> ScoreWeights {
        ScoreWeights {
            priority: self.priority_weight,
            load: self.load_weight,
            jitter: self.jitter_weight,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open an account's circuit.
    pub threshold: u32,

    /// Seconds after the last failure before the circuit closes again.
    pub reset_timeout_secs: u64,

    /// Seconds between sweeps of expired failure records.
    pub sweep_interval_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout_secs: 300,
            sweep_interval_secs: 3600,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}
