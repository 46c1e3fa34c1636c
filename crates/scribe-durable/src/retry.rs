//! Retry backoff policy
//!
//! Exponential backoff with jitter to avoid thundering herd. The retry
//! budget itself (max_attempts) lives on the job row; this policy only
//! shapes the delay curve.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Cap on the delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g. 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0); 0.1 means +-10% randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with sensible defaults: 1 s initial, 60 s cap,
    /// 2x coefficient, 10% jitter.
    pub fn exponential() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    /// Fixed-interval policy (no backoff growth)
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to apply after `attempt` has failed (1-based).
    ///
    /// Grows as `initial * coefficient^(attempt-1)`, capped at
    /// `max_interval`, then jittered.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(attempt as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + jitter_offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let policy = RetryPolicy::exponential().with_jitter(0.0);

        assert_eq!(policy.delay_after_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::exponential()
            .with_max_interval(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(policy.delay_after_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::exponential().with_jitter(0.5);

        for _ in 0..100 {
            let delay = policy.delay_after_attempt(2).as_secs_f64();
            assert!(delay >= 1.0 && delay <= 3.0, "delay {delay} out of band");
        }
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5));
        assert_eq!(policy.delay_after_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after_attempt(7), Duration::from_secs(5));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let policy = RetryPolicy::exponential().with_max_interval(Duration::from_secs(30));
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
