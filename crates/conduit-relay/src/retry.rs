//! Backoff between relay attempts.
//!
//! Attempts for one event run sequentially inside a single task, so the
//! policy only has to answer "wait how long, or give up".

use std::time::Duration;

use rand::Rng;

use crate::error::RelayError;

/// Retry policy for one event's attempt sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Upper bound for any delay, including server-requested ones.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied to computed delays.
    pub jitter_factor: f64,

    /// How delays grow between attempts.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.1,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay every time.
    Fixed,
    /// Delay doubles each attempt.
    Exponential,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then try again.
    Retry {
        /// Time to wait before the next attempt
        delay: Duration,
    },
    /// Stop; the event is dropped.
    GiveUp {
        /// Why no further attempt is made
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides whether attempt `attempt_number + 1` should happen.
    ///
    /// `attempt_number` is 1-based and refers to the attempt that just failed.
    pub fn decide(&self, attempt_number: u32, error: &RelayError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {error}") };
        }

        if attempt_number >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry { delay: self.delay_for(attempt_number, error) }
    }

    /// Delay after the given failed attempt.
    ///
    /// A server-provided Retry-After wins over the computed backoff but is
    /// still capped by `max_delay`.
    pub fn delay_for(&self, attempt_number: u32, error: &RelayError) -> Duration {
        if let Some(seconds) = error.retry_after_seconds() {
            return Duration::from_secs(seconds).min(self.max_delay);
        }

        let base = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let exponent = attempt_number.saturating_sub(1).min(20);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };

        let capped = base.min(self.max_delay);
        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let range = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::rng().random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy { jitter_factor: 0.0, ..Default::default() }
    }

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let policy = RetryPolicy { max_attempts: 10, ..no_jitter() };
        let error = RelayError::timeout(10);

        let delays: Vec<_> = (1..=6).map(|n| policy.delay_for(n, &error)).collect();

        assert_eq!(
            delays,
            [1, 2, 4, 8, 10, 10].map(Duration::from_secs).to_vec(),
        );
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = no_jitter();
        let error = RelayError::server_error(503, "");

        assert!(matches!(policy.decide(2, &error), RetryDecision::Retry { .. }));
        match policy.decide(3, &error) {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("maximum attempts")),
            RetryDecision::Retry { .. } => unreachable!("third attempt is the last"),
        }
    }

    #[test]
    fn non_retryable_errors_give_up_immediately() {
        let decision = no_jitter()
            .decide(1, &RelayError::InvalidToken { status_code: 400, api_code: Some(190) });

        assert!(matches!(decision, RetryDecision::GiveUp { reason } if reason.contains("non-retryable")));
    }

    #[test]
    fn retry_after_is_respected_and_capped() {
        let policy = no_jitter();

        let short = RelayError::RateLimited { retry_after_seconds: Some(3) };
        assert_eq!(policy.delay_for(1, &short), Duration::from_secs(3));

        let long = RelayError::RateLimited { retry_after_seconds: Some(3600) };
        assert_eq!(policy.delay_for(1, &long), Duration::from_secs(10));

        let unspecified = RelayError::RateLimited { retry_after_seconds: None };
        assert_eq!(policy.delay_for(2, &unspecified), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..50 {
            let jittered = apply_jitter(base, 0.5);
            assert!(jittered >= Duration::from_secs(5), "{jittered:?}");
            assert!(jittered <= Duration::from_secs(15), "{jittered:?}");
        }
    }

    #[test]
    fn fixed_strategy_ignores_attempt_number() {
        let policy = RetryPolicy { backoff_strategy: BackoffStrategy::Fixed, ..no_jitter() };
        let error = RelayError::network("reset");

        assert_eq!(policy.delay_for(1, &error), policy.delay_for(5, &error));
    }
}
