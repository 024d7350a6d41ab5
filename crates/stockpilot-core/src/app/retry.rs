//! Retry policy: decides whether and how long to back off.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::RetryConfig;
use crate::domain::ErrorKind;

/// Exponential backoff with optional jitter.
///
/// delay(attempt) = min(base_delay * exponential_base^attempt, max_delay)
///
/// Example with base_delay=2s, exponential_base=2.0, max_delay=60s:
/// - attempt 1: 4s
/// - attempt 2: 8s
/// - attempt 5: 60s (capped)
///
/// With jitter the delay is multiplied by a uniform factor in [0.5, 1.0].
/// A fixed `seed` makes the jitter sequence reproducible.
#[derive(Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
    rng: Mutex<StdRng>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            exponential_base: 2.0,
            jitter: false,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let policy = Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_exponential_base(config.exponential_base)
        .with_jitter(config.jitter);
        match config.seed {
            Some(seed) => policy.with_seed(seed),
            None => policy,
        }
    }

    pub fn with_exponential_base(mut self, exponential_base: f64) -> Self {
        self.exponential_base = exponential_base;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// `false` once `attempt_count >= max_retries`, and always for `Auth`.
    pub fn should_retry(&self, error_kind: ErrorKind, attempt_count: u32) -> bool {
        self.should_retry_within(error_kind, attempt_count, self.max_retries)
    }

    /// `should_retry` against a per-task bound (`SubmitOptions::max_retries`).
    pub fn should_retry_within(&self, error_kind: ErrorKind, attempt_count: u32, max_retries: u32) -> bool {
        if error_kind == ErrorKind::Auth {
            return false;
        }
        attempt_count < max_retries
    }

    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let max_secs = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(attempt_count).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let mut secs = if raw.is_finite() { raw.clamp(0.0, max_secs) } else { max_secs };
        if self.jitter {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            secs *= rng.gen_range(0.5..=1.0);
        }
        Duration::from_secs_f64(secs)
    }

    /// Sleep for `delay_for(attempt_count)`.
    ///
    /// Not interruptible; the orchestrator slices its own backoff so that a stop
    /// is observed within one poll interval.
    pub async fn wait(&self, attempt_count: u32) {
        tokio::time::sleep(self.delay_for(attempt_count)).await;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(60))
    }

    #[rstest]
    #[case::network(ErrorKind::Network)]
    #[case::rate_limit(ErrorKind::RateLimit)]
    #[case::timeout(ErrorKind::Timeout)]
    #[case::parse(ErrorKind::Parse)]
    #[case::api(ErrorKind::Api)]
    #[case::unknown(ErrorKind::Unknown)]
    fn retryable_kinds_retry_up_to_limit(#[case] kind: ErrorKind) {
        let p = policy();
        assert!(p.should_retry(kind, 0));
        assert!(p.should_retry(kind, 2));
        assert!(!p.should_retry(kind, 3));
        assert!(!p.should_retry(kind, 4));
    }

    #[rstest]
    #[case(0)]
    #[case(100)]
    fn auth_is_never_retried(#[case] max_retries: u32) {
        let p = RetryPolicy::new(max_retries, Duration::from_secs(1), Duration::from_secs(5));
        assert!(!p.should_retry(ErrorKind::Auth, 0));
    }

    #[test]
    fn zero_max_retries_never_retries() {
        let p = RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(5));
        assert!(!p.should_retry(ErrorKind::Network, 0));
    }

    #[rstest]
    #[case(0, 2)]
    #[case(1, 4)]
    #[case(2, 8)]
    #[case(4, 32)]
    #[case(5, 60)]
    #[case(30, 60)]
    fn exponential_backoff_is_capped(#[case] attempt: u32, #[case] secs: u64) {
        assert_eq!(policy().delay_for(attempt), Duration::from_secs(secs));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        assert_eq!(policy().delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_in_half_to_full_range() {
        let p = policy().with_jitter(true).with_seed(7);
        for _ in 0..100 {
            let d = p.delay_for(1);
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(4), "{d:?}");
        }
    }

    #[test]
    fn jitter_is_deterministic_for_a_seed() {
        let a = policy().with_jitter(true).with_seed(42);
        let b = policy().with_jitter(true).with_seed(42);
        let xs: Vec<Duration> = (0..5).map(|n| a.delay_for(n)).collect();
        let ys: Vec<Duration> = (0..5).map(|n| b.delay_for(n)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn from_config_copies_every_knob() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            exponential_base: 3.0,
            jitter: false,
            seed: Some(1),
        };
        let p = RetryPolicy::from_config(&config);
        assert_eq!(p.max_retries, 5);
        assert_eq!(p.delay_for(2), Duration::from_secs(9));
    }
}
