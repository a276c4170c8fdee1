//! Relay behavior against a fake conversions API.
//!
//! Covers retry with backoff, the per-tenant circuit on token rejection,
//! and the non-blocking queue in front of the workers.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use conduit_core::{pii, Clock, Event, TenantKey};
use conduit_relay::{CircuitState, RelayError, RelayOutcome};
use conduit_testing::{
    fixtures::{self, DEFAULT_ACCESS_TOKEN, DEFAULT_TENANT},
    CredentialBuilder, TestEnv, RELAY_WAIT,
};

fn event_at(env: &TestEnv, tenant: &str, event_id: &str) -> Event {
    let received_at = DateTime::<Utc>::from(env.clock.now_system());
    fixtures::event(tenant, event_id, received_at)
}

#[tokio::test]
async fn transient_failures_are_retried_until_delivered() -> Result<()> {
    let env = TestEnv::new().await?;
    env.add_tenant(CredentialBuilder::with_defaults().build()).await?;
    env.capi.fail_with_server_error(2).await;
    env.capi.accept_all().await;

    let outcome = env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-1")).await;

    assert!(matches!(outcome, RelayOutcome::Delivered { attempts: 3 }), "got {outcome:?}");
    assert_eq!(env.capi.request_count().await, 3);
    // 1s after the first failure, 2s after the second
    assert_eq!(env.clock.total_slept(), Duration::from_secs(3));
    Ok(())
}

#[tokio::test]
async fn retries_stop_at_max_attempts() -> Result<()> {
    let env = TestEnv::new().await?;
    env.add_tenant(CredentialBuilder::with_defaults().build()).await?;
    env.capi.fail_with_server_error(10).await;

    let outcome = env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-1")).await;

    match outcome {
        RelayOutcome::Dropped { attempts, error } => {
            assert_eq!(attempts, 3);
            assert!(matches!(error, RelayError::ServerError { status_code: 500, .. }));
        },
        other => panic!("expected drop, got {other:?}"),
    }
    assert_eq!(env.capi.request_count().await, 3);
    Ok(())
}

#[tokio::test]
async fn rejected_payload_is_not_retried_and_keeps_circuit_closed() -> Result<()> {
    let env = TestEnv::new().await?;
    env.add_tenant(CredentialBuilder::with_defaults().build()).await?;
    env.capi.reject_payload().await;

    let outcome = env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-1")).await;

    assert!(matches!(outcome, RelayOutcome::Dropped { attempts: 1, .. }), "got {outcome:?}");
    assert_eq!(
        env.relayer.circuit().state(&TenantKey::from(DEFAULT_TENANT)).await,
        CircuitState::Closed
    );
    Ok(())
}

#[tokio::test]
async fn invalid_token_disables_tenant_without_further_calls() -> Result<()> {
    let env = TestEnv::new().await?;
    env.add_tenant(CredentialBuilder::with_defaults().build()).await?;
    env.capi.reject_token().await;

    let first = env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-1")).await;
    assert!(matches!(first, RelayOutcome::TenantDisabled { attempts: 1, .. }), "got {first:?}");

    let second = env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-2")).await;
    assert!(
        matches!(second, RelayOutcome::Skipped { reason: RelayError::CircuitOpen { .. } }),
        "got {second:?}"
    );

    assert_eq!(env.capi.request_count().await, 1);
    assert_eq!(env.relayer.circuit().open_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn tenant_recovers_after_cooldown() -> Result<()> {
    let env = TestEnv::builder().circuit_cooldown(Duration::from_secs(3600)).build().await?;
    env.add_tenant(CredentialBuilder::with_defaults().build()).await?;
    env.capi.reject_token().await;

    env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-1")).await;

    env.advance_time(Duration::from_secs(3599));
    let still_open = env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-2")).await;
    assert!(matches!(still_open, RelayOutcome::Skipped { .. }));

    env.capi.reset().await;
    env.capi.accept_all().await;
    env.advance_time(Duration::from_secs(1));

    let outcome = env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-3")).await;
    assert!(outcome.is_delivered(), "got {outcome:?}");
    assert_eq!(env.capi.request_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn reauthentication_lifts_cooldown() -> Result<()> {
    let env = TestEnv::new().await?;
    env.add_tenant(CredentialBuilder::with_defaults().build()).await?;
    env.capi.reject_token().await;
    env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-1")).await;

    let malformed = CredentialBuilder::with_defaults().access_token("short").build();
    let refused = env.relayer.reauthenticate(&malformed).await;
    assert!(matches!(refused, Err(RelayError::InvalidCredentials { .. })), "got {refused:?}");
    assert_eq!(env.relayer.circuit().open_count().await, 1);

    let rotated_token = "EAAGm0PX4ZCpsBArotatedTokenValue98765";
    env.relayer
        .reauthenticate(&CredentialBuilder::with_defaults().access_token(rotated_token).build())
        .await?;
    env.capi.reset().await;
    env.capi.accept_all().await;

    let outcome = env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-2")).await;
    assert!(outcome.is_delivered(), "got {outcome:?}");
    let sent = env.capi.received_bodies().await;
    assert_eq!(sent[0]["access_token"], rotated_token);
    Ok(())
}

#[tokio::test]
async fn open_circuit_is_scoped_to_one_tenant() -> Result<()> {
    let env = TestEnv::new().await?;
    env.add_tenant(CredentialBuilder::with_defaults().tenant("tenant-a").build()).await?;
    env.add_tenant(CredentialBuilder::with_defaults().tenant("tenant-b").build()).await?;
    env.capi.accept_all().await;

    env.relayer.circuit().trip(&TenantKey::from("tenant-a")).await;

    let blocked = env.relayer.relay(&event_at(&env, "tenant-a", "e1")).await;
    let delivered = env.relayer.relay(&event_at(&env, "tenant-b", "e1")).await;

    assert!(matches!(blocked, RelayOutcome::Skipped { .. }));
    assert!(delivered.is_delivered());
    assert_eq!(env.capi.request_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn missing_or_disabled_credentials_skip_relay() -> Result<()> {
    let env = TestEnv::new().await?;
    env.add_tenant(CredentialBuilder::with_defaults().tenant("paused").disabled().build()).await?;
    env.capi.accept_all().await;

    let unknown = env.relayer.relay(&event_at(&env, "unknown", "e1")).await;
    let paused = env.relayer.relay(&event_at(&env, "paused", "e1")).await;

    for outcome in [unknown, paused] {
        assert!(
            matches!(outcome, RelayOutcome::Skipped { reason: RelayError::MissingCredentials { .. } }),
            "got {outcome:?}"
        );
    }
    assert_eq!(env.capi.request_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn malformed_token_is_caught_before_sending() -> Result<()> {
    let env = TestEnv::new().await?;
    env.add_tenant(CredentialBuilder::with_defaults().access_token("short token!").build()).await?;
    env.capi.accept_all().await;

    let outcome = env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "e1")).await;

    assert!(
        matches!(outcome, RelayOutcome::Skipped { reason: RelayError::InvalidCredentials { .. } }),
        "got {outcome:?}"
    );
    assert_eq!(env.capi.request_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn request_carries_token_and_hashed_identity() -> Result<()> {
    let env = TestEnv::new().await?;
    env.add_tenant(CredentialBuilder::with_defaults().test_event_code("TEST123").build()).await?;
    env.capi.accept_all().await;

    env.relayer.relay(&event_at(&env, DEFAULT_TENANT, "lead-1")).await;

    let bodies = env.capi.received_bodies().await;
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["access_token"], DEFAULT_ACCESS_TOKEN);
    assert_eq!(body["test_event_code"], "TEST123");
    assert_eq!(body["data"][0]["event_id"], "lead-1");
    assert_eq!(body["data"][0]["action_source"], "website");
    assert_eq!(body["data"][0]["user_data"]["em"][0], pii::sha256_hex("lead@example.com"));
    Ok(())
}

#[tokio::test]
async fn enqueue_returns_before_slow_downstream_answers() -> Result<()> {
    let mut env = TestEnv::new().await?;
    env.add_tenant(CredentialBuilder::with_defaults().build()).await?;
    env.capi.accept_after(Duration::from_millis(500)).await;

    let start = Instant::now();
    env.queue.enqueue(event_at(&env, DEFAULT_TENANT, "lead-1"))?;
    assert!(start.elapsed() < Duration::from_millis(100));

    env.capi.wait_for_requests(1, RELAY_WAIT).await?;
    assert_eq!(env.queue.enqueued(), 1);

    env.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn full_queue_rejects_without_blocking() -> Result<()> {
    let env = TestEnv::builder().without_workers().queue_capacity(1).build().await?;

    env.queue.enqueue(event_at(&env, DEFAULT_TENANT, "e1"))?;
    let overflow = env.queue.enqueue(event_at(&env, DEFAULT_TENANT, "e2"));

    assert!(matches!(overflow, Err(RelayError::QueueFull { capacity: 1 })));
    assert_eq!(env.queue.depth(), 1);
    assert_eq!(env.queue.rejected(), 1);
    Ok(())
}

#[tokio::test]
async fn workers_drain_queue_with_several_tenants() -> Result<()> {
    let mut env = TestEnv::builder().worker_count(4).build().await?;
    env.capi.accept_all().await;
    for tenant in ["t1", "t2", "t3"] {
        env.add_tenant(CredentialBuilder::with_defaults().tenant(tenant).build()).await?;
    }

    for tenant in ["t1", "t2", "t3"] {
        for n in 0..5 {
            env.queue.enqueue(event_at(&env, tenant, &format!("e{n}")))?;
        }
    }

    env.capi.wait_for_requests(15, RELAY_WAIT).await?;
    env.shutdown().await?;

    assert_eq!(env.relayer.stats().snapshot().delivered, 15);
    Ok(())
}
