//! Service health endpoints: `/health`, `/ready` and `/live`.
//!
//! Health and readiness both ping the event store; nothing can be accepted
//! while it is down. Liveness never leaves the process.

use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use conduit_core::{EventStore, SharedClock};
use conduit_relay::RelayQueue;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::AppState;

/// Body of `/health` and `/ready`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// Verdict over all dependencies
    pub status: ServiceStatus,
    /// When the check ran
    pub timestamp: DateTime<Utc>,
    /// Per-dependency detail
    pub checks: HealthChecks,
    /// Crate version
    pub version: &'static str,
}

/// Service verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Ready to accept events
    Healthy,
    /// Event store unreachable
    Unhealthy,
}

/// Dependencies inspected by a check.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Event store ping
    pub database: StoreCheck,
    /// Relay queue counters; informational only
    pub relay_queue: QueueSnapshot,
}

/// Result of pinging the event store.
#[derive(Debug, Serialize)]
pub struct StoreCheck {
    /// Up or down
    pub status: DependencyStatus,
    /// Generic reason when down; internals stay in the logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    /// Ping latency
    pub latency_ms: u64,
}

/// Relay queue counters at check time.
#[derive(Debug, Serialize)]
pub struct QueueSnapshot {
    /// Events waiting for a worker
    pub depth: usize,
    /// Events accepted since start
    pub enqueued: u64,
    /// Events turned away because the queue was full
    pub rejected: u64,
}

impl From<&RelayQueue> for QueueSnapshot {
    fn from(queue: &RelayQueue) -> Self {
        Self { depth: queue.depth(), enqueued: queue.enqueued(), rejected: queue.rejected() }
    }
}

/// Dependency state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    /// Answered the ping
    Up,
    /// Failed the ping
    Down,
}

/// Runs health checks against injected dependencies.
pub struct HealthChecker {
    clock: SharedClock,
}

impl HealthChecker {
    /// Creates a checker stamping reports with `clock`.
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }

    /// Pings the store and snapshots the queue.
    pub async fn check(&self, events: &dyn EventStore, queue: &RelayQueue) -> HealthReport {
        let database = Self::ping_store(events).await;
        let status = match database.status {
            DependencyStatus::Up => ServiceStatus::Healthy,
            DependencyStatus::Down => ServiceStatus::Unhealthy,
        };

        HealthReport {
            status,
            timestamp: DateTime::<Utc>::from(self.clock.now_system()),
            checks: HealthChecks { database, relay_queue: QueueSnapshot::from(queue) },
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    async fn ping_store(events: &dyn EventStore) -> StoreCheck {
        let started = Instant::now();
        let result = events.health_check().await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(()) => StoreCheck { status: DependencyStatus::Up, message: None, latency_ms },
            Err(e) => {
                warn!(error = %e, latency_ms, "event store ping failed");
                StoreCheck {
                    status: DependencyStatus::Down,
                    message: Some("database unavailable"),
                    latency_ms,
                }
            },
        }
    }
}

/// `GET /health`: 200 when the event store answers, 503 otherwise.
#[instrument(name = "health_check", skip_all)]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let report = HealthChecker::new(state.clock.clone())
        .check(state.events.as_ref(), &state.relay_queue)
        .await;

    let code = match report.status {
        ServiceStatus::Healthy => StatusCode::OK,
        ServiceStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    debug!(status = ?report.status, queue_depth = report.checks.relay_queue.depth, "health check done");

    (code, Json(report)).into_response()
}

/// `GET /ready`: same verdict as `/health`.
#[instrument(name = "readiness_check", skip_all)]
pub async fn readiness_check(state: State<AppState>) -> Response {
    health_check(state).await
}

/// `GET /live`: the process is up.
#[instrument(name = "liveness_check", skip_all)]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    let body = json!({
        "status": "alive",
        "timestamp": DateTime::<Utc>::from(state.clock.now_system()),
        "service": "conduit",
    });

    (StatusCode::OK, Json(body)).into_response()
}
