//! Candidate scoring.
//!
//! `score = priority * w_priority + load_rate * w_load + jitter * w_jitter`,
//! lower wins. Jitter is drawn from an explicit seed so the same seed always
//! ranks the same way.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Weights of the three score terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub priority: f64,
    pub load: f64,
    pub jitter: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            priority: 0.5,
            load: 0.3,
            jitter: 0.2,
        }
    }
}

impl ScoreWeights {
    /// Score one candidate. A candidate with no capacity counts as fully loaded.
    pub fn score(&self, priority: i32, live: u32, max_concurrency: u32, jitter: f64) -> f64 {
        f64::from(priority) * self.priority
            + load_rate(live, max_concurrency) * self.load
            + jitter * self.jitter
    }
}

/// Fraction of capacity in use.
pub fn load_rate(live: u32, max_concurrency: u32) -> f64 {
    if max_concurrency == 0 {
        1.0
    } else {
        f64::from(live) / f64::from(max_concurrency)
    }
}

/// Stable per-process seed derived from a holder token.
pub fn seed_from_holder(holder: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    holder.hash(&mut hasher);
    hasher.finish()
}

/// Draw one jitter value in `[0, 1)` per candidate, in input order.
pub fn jitter_values(seed: u64, count: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|_| rng.gen::<f64>()).collect()
}

/// Order candidate indices by ascending score, ties by input position.
pub fn rank(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));
    order
}
