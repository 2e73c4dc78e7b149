//! Delay between lease acquisition attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy for calculating the wait before retry `attempt` (0-indexed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed { delay_ms: u64 },
    /// initial + increment * attempt, capped
    Linear {
        initial_ms: u64,
        increment_ms: u64,
        max_ms: u64,
    },
    /// initial * multiplier^attempt, capped
    Exponential {
        initial_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
    /// Exponential with +/- jitter_factor random spread
    ExponentialWithJitter {
        initial_ms: u64,
        multiplier: f64,
        max_ms: u64,
        jitter_factor: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Fixed { delay_ms: 10 }
    }
}

impl BackoffStrategy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = match self {
            Self::Fixed { delay_ms } => *delay_ms,
            Self::Linear {
                initial_ms,
                increment_ms,
                max_ms,
            } => initial_ms
                .saturating_add(increment_ms.saturating_mul(attempt as u64))
                .min(*max_ms),
            Self::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                let delay = (*initial_ms as f64) * multiplier.powi(attempt as i32);
                delay.min(*max_ms as f64) as u64
            }
            Self::ExponentialWithJitter {
                initial_ms,
                multiplier,
                max_ms,
                jitter_factor,
            } => {
                let base_delay = (*initial_ms as f64) * multiplier.powi(attempt as i32);
                let capped_delay = base_delay.min(*max_ms as f64);
                let jitter_range = capped_delay * jitter_factor;
                let jitter = (rand_simple() * 2.0 - 1.0) * jitter_range;
                (capped_delay + jitter).max(0.0) as u64
            }
        };

        Duration::from_millis(ms)
    }

    pub fn fixed(delay_ms: u64) -> Self {
        Self::Fixed { delay_ms }
    }

    /// No wait between attempts.
    pub fn immediate() -> Self {
        Self::Fixed { delay_ms: 0 }
    }
}

/// Pseudo-random value in 0.0..=1.0 for jitter.
fn rand_simple() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
    );
    (hasher.finish() as f64) / (u64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_ten_ms() {
        let backoff = BackoffStrategy::default();
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(backoff.delay_for_attempt(9), Duration::from_millis(10));
    }

    #[test]
    fn test_linear_caps() {
        let backoff = BackoffStrategy::Linear {
            initial_ms: 5,
            increment_ms: 3,
            max_ms: 12,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(5));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(11));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(12));
    }

    #[test]
    fn test_exponential() {
        let backoff = BackoffStrategy::Exponential {
            initial_ms: 1,
            multiplier: 2.0,
            max_ms: 100,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(1));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(8));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = BackoffStrategy::ExponentialWithJitter {
            initial_ms: 100,
            multiplier: 1.0,
            max_ms: 100,
            jitter_factor: 0.2,
        };
        for attempt in 0..20 {
            let delay = backoff.delay_for_attempt(attempt).as_millis();
            assert!((80..=120).contains(&delay), "delay {delay} out of range");
        }
    }
}
