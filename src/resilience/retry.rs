//! Exponential backoff policy for transient remote failures.

use rand::{Rng, thread_rng};
use tokio::time::Duration;

use crate::config::RetryPolicyConfig;

/// Backoff schedule used by the client facade between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryPolicyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Delay before the attempt following `prior_failures` failed attempts.
    /// A server-provided Retry-After hint wins when it is larger than the
    /// computed backoff.
    pub fn delay_for(&self, prior_failures: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = prior_failures.min(31) as i32;
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent as u32))
            .min(self.max_delay);
        let backoff = match retry_after {
            Some(hint) => backoff.max(hint),
            None => backoff,
        };
        backoff + self.jitter(backoff)
    }

    fn jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_factor == 0.0 || backoff.is_zero() {
            return Duration::ZERO;
        }
        let ceiling = backoff.as_secs_f64() * self.jitter_factor;
        Duration::from_secs_f64(thread_rng().gen_range(0.0..ceiling))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&RetryPolicyConfig {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.1,
        })
    }

    #[test]
    fn backoff_doubles_per_failure() {
        let policy = policy();
        let d0 = policy.delay_for(0, None);
        let d1 = policy.delay_for(1, None);
        let d2 = policy.delay_for(2, None);

        assert!(d0 >= Duration::from_millis(500) && d0 <= Duration::from_millis(550));
        assert!(d1 >= Duration::from_millis(1000) && d1 <= Duration::from_millis(1100));
        assert!(d2 >= Duration::from_millis(2000) && d2 <= Duration::from_millis(2200));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = policy();
        let delay = policy.delay_for(20, None);
        assert!(delay <= Duration::from_millis(33_000));
        assert!(delay >= Duration::from_millis(30_000));
    }

    #[test]
    fn larger_retry_after_hint_wins() {
        let policy = policy();
        let delay = policy.delay_for(0, Some(Duration::from_secs(120)));
        assert!(delay >= Duration::from_secs(120));

        // A smaller hint than the computed backoff is ignored.
        let delay = policy.delay_for(3, Some(Duration::from_millis(1)));
        assert!(delay >= Duration::from_millis(4000));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = RetryPolicy::from_config(&RetryPolicyConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
        });
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(200));
    }
}
