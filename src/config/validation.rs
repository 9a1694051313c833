//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, batches > 0, finite weights)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SchedulerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::SchedulerConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// One rejected configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic constraint and collect all violations.
pub fn validate_config(config: &SchedulerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.store.url.trim().is_empty() {
        errors.push(ValidationError::new("store.url", "must not be empty"));
    }
    if config.store.command_timeout_secs == 0 {
        errors.push(ValidationError::new("store.command_timeout_secs", "must be > 0"));
    }

    if config.slots.release_timeout_secs == 0 {
        errors.push(ValidationError::new("slots.release_timeout_secs", "must be > 0"));
    }

    if config.wait_queue.cleanup_batch == 0 {
        errors.push(ValidationError::new("wait_queue.cleanup_batch", "must be > 0"));
    }
    if config.wait_queue.depth_cleanup_batch == 0 {
        errors.push(ValidationError::new("wait_queue.depth_cleanup_batch", "must be > 0"));
    }

    let weights = [
        ("selection.priority_weight", config.selection.priority_weight),
        ("selection.load_weight", config.selection.load_weight),
        ("selection.jitter_weight", config.selection.jitter_weight),
    ];
    for (field, weight) in weights {
        if !weight.is_finite() || weight < 0.0 {
            errors.push(ValidationError::new(
                field,
                format!("must be a finite non-negative number, got {weight}"),
            ));
        }
    }
    if weights.iter().all(|(_, w)| *w == 0.0) {
        errors.push(ValidationError::new("selection", "at least one weight must be non-zero"));
    }

    let breaker = &config.circuit_breaker;
    if breaker.threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.threshold", "must be > 0"));
    }
    if breaker.reset_timeout_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.reset_timeout_secs", "must be > 0"));
    }
    if breaker.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.sweep_interval_secs", "must be > 0"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
