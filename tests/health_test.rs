//! Health, readiness and liveness endpoints.

use anyhow::Result;
use axum::body::Body;
use chrono::DateTime;
use conduit_testing::{fixtures, TestEnv};
use http::{Request, StatusCode};

async fn get(env: &TestEnv, path: &str) -> Result<conduit_testing::TestResponse> {
    env.send(Request::get(path).body(Body::empty())?).await
}

#[tokio::test]
async fn healthy_store_reports_up() -> Result<()> {
    let env = TestEnv::new().await?;

    let response = get(&env, "/health").await?;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["checks"]["database"]["status"], "up");
    assert_eq!(response.body["timestamp"], "2023-11-14T22:13:20Z");
    assert!(response.body["version"].is_string());
    Ok(())
}

#[tokio::test]
async fn failing_store_makes_service_unready() -> Result<()> {
    let env = TestEnv::new().await?;
    env.events.fail_inserts_with("pool timed out").await;

    for path in ["/health", "/ready"] {
        let response = get(&env, path).await?;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE, "{path}");
        assert_eq!(response.body["status"], "unhealthy");
        assert_eq!(response.body["checks"]["database"]["status"], "down");
        assert_eq!(response.body["checks"]["database"]["message"], "database unavailable");
    }

    let live = get(&env, "/live").await?;
    assert_eq!(live.status, StatusCode::OK);
    assert_eq!(live.body["status"], "alive");
    Ok(())
}

#[tokio::test]
async fn queue_counters_are_reported() -> Result<()> {
    let env = TestEnv::builder().without_workers().queue_capacity(1).build().await?;
    let now = DateTime::from_timestamp(env.unix_now(), 0).expect("valid timestamp");

    env.queue.enqueue(fixtures::event("t1", "e1", now))?;
    let _ = env.queue.enqueue(fixtures::event("t1", "e2", now));

    let response = get(&env, "/health").await?;
    let queue = &response.body["checks"]["relay_queue"];
    assert_eq!(queue["depth"], 1);
    assert_eq!(queue["enqueued"], 1);
    assert_eq!(queue["rejected"], 1);
    Ok(())
}
