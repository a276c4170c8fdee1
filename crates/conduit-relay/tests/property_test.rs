//! Property tests for retry decisions and backoff bounds.

use std::time::Duration;

use conduit_relay::{BackoffStrategy, RelayError, RetryDecision, RetryPolicy};
use proptest::prelude::*;

fn policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (1u32..10, 1u64..5_000, 1u64..120, 0.0f64..=1.0, prop::bool::ANY).prop_map(
        |(max_attempts, base_ms, max_secs, jitter_factor, exponential)| RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(max_secs),
            jitter_factor,
            backoff_strategy: if exponential {
                BackoffStrategy::Exponential
            } else {
                BackoffStrategy::Fixed
            },
        },
    )
}

fn retryable_error() -> impl Strategy<Value = RelayError> {
    prop_oneof![
        Just(RelayError::timeout(10)),
        Just(RelayError::network("connection reset")),
        (500u16..600).prop_map(|code| RelayError::server_error(code, "")),
        prop::option::of(0u64..600)
            .prop_map(|retry_after_seconds| RelayError::RateLimited { retry_after_seconds }),
    ]
}

proptest! {
    #[test]
    fn delay_never_exceeds_cap(
        policy in policy_strategy(),
        attempt in 1u32..50,
        error in retryable_error(),
    ) {
        prop_assert!(policy.delay_for(attempt, &error) <= policy.max_delay);
    }

    #[test]
    fn retries_end_exactly_at_max_attempts(policy in policy_strategy(), error in retryable_error()) {
        for attempt in 1..policy.max_attempts {
            let is_retry = matches!(policy.decide(attempt, &error), RetryDecision::Retry { .. });
            prop_assert!(is_retry);
        }
        let last = matches!(policy.decide(policy.max_attempts, &error), RetryDecision::GiveUp { .. });
        prop_assert!(last);
    }

    #[test]
    fn token_and_payload_rejections_are_never_retried(
        policy in policy_strategy(),
        attempt in 1u32..10,
        status in 400u16..500,
    ) {
        let token = RelayError::InvalidToken { status_code: status, api_code: Some(190) };
        let payload = RelayError::rejected(status, "bad parameter");

        let token_gives_up = matches!(policy.decide(attempt, &token), RetryDecision::GiveUp { .. });
        let payload_gives_up =
            matches!(policy.decide(attempt, &payload), RetryDecision::GiveUp { .. });
        prop_assert!(token_gives_up);
        prop_assert!(payload_gives_up);
    }

    #[test]
    fn jittered_delay_stays_within_band(
        base_ms in 100u64..5_000,
        jitter_factor in 0.0f64..=0.5,
    ) {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(3_600),
            jitter_factor,
            backoff_strategy: BackoffStrategy::Fixed,
        };

        let delay = policy.delay_for(1, &RelayError::timeout(10)).as_secs_f64();
        let base = policy.base_delay.as_secs_f64();
        let band = base * jitter_factor + 1e-6;

        prop_assert!(delay >= base - band && delay <= base + band);
    }
}
