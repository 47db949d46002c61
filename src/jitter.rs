//! Randomized politeness delays.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Uniform random delay between `min_ms` and `max_ms` (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterPolicy {
    /// Lower bound in milliseconds.
    pub min_ms: u64,
    /// Upper bound in milliseconds.
    pub max_ms: u64,
}

impl JitterPolicy {
    /// Creates a policy from millisecond bounds.
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// A policy that never waits.
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// Returns true if this policy never waits.
    pub fn is_none(&self) -> bool {
        self.max_ms == 0
    }

    /// Draws one delay.
    pub fn delay(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }

    /// Sleeps for one drawn delay.
    pub async fn sleep(&self) {
        if self.is_none() {
            return;
        }
        tokio::time::sleep(self.delay()).await;
    }
}

impl Default for JitterPolicy {
    fn default() -> Self {
        Self::new(1000, 3000)
    }
}
