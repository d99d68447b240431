//! Bounded retry policy for compare-and-swap cycles

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 128;

/// How many read-modify-write cycles to attempt and how long to wait
/// between them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_backoff_bounds"))]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[validate(range(min = 1, max = 1000))]
    pub max_attempts: u32,

    /// Ceiling of the first backoff; zero disables sleeping
    pub initial_backoff_ms: u64,

    /// Backoff ceiling after doubling
    #[validate(range(max = 60000))]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, up to `max_attempts` times
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            ceiling_ms: self.initial_backoff_ms,
            max_ms: self.max_backoff_ms,
        }
    }
}

fn validate_backoff_bounds(policy: &RetryPolicy) -> Result<(), ValidationError> {
    if policy.initial_backoff_ms > policy.max_backoff_ms {
        return Err(ValidationError::new("initial_backoff_exceeds_max"));
    }
    Ok(())
}

/// Exponential backoff with full jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    ceiling_ms: u64,
    max_ms: u64,
}

impl Backoff {
    /// Next delay, uniformly drawn from `[0, ceiling]`; the ceiling doubles
    /// up to the policy maximum
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling_ms;
        self.ceiling_ms = ceiling.saturating_mul(2).min(self.max_ms);

        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }

    pub fn wait(&mut self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}
