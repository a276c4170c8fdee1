//! Test infrastructure for the conversions relay.
//!
//! [`TestEnv`] wires the production pipeline against in-memory stores, a
//! manually driven clock and a fake conversions API, so ingestion, dedup
//! and relay can be exercised end to end without a database.
//! [`TestDatabase`] covers the SQL repositories against a real PostgreSQL.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{body::Body, Router};
use conduit_api::{create_router, AppState, RequestLimits};
use conduit_core::{
    store::memory::{InMemoryCredentialStore, InMemoryEventStore},
    Clock, CredentialStore, DedupConfig, DedupGuard, Event, EventId, TenantCredential, TenantKey,
    TestClock,
};
use conduit_relay::{
    BackoffStrategy, CapiClient, CircuitBreaker, CircuitConfig, ClientConfig, RelayQueue,
    RelayQueueConfig, Relayer, RetryPolicy, WorkerPool,
};
use http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub mod capi;
pub mod database;
pub mod fixtures;

pub use capi::FakeCapi;
pub use database::TestDatabase;
pub use fixtures::CredentialBuilder;

/// Fixed start of test time: 2023-11-14T22:13:20Z.
pub const TEST_EPOCH: u64 = 1_700_000_000;

/// How long helpers wait for background relays.
pub const RELAY_WAIT: Duration = Duration::from_secs(5);

/// Builder for configuring a [`TestEnv`].
pub struct TestEnvBuilder {
    worker_count: usize,
    queue_capacity: usize,
    start_workers: bool,
    retry_policy: RetryPolicy,
    circuit: CircuitConfig,
    dedup: DedupConfig,
    limits: RequestLimits,
    client_timeout: Duration,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            worker_count: 1,
            queue_capacity: 100,
            start_workers: true,
            retry_policy: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(10),
                jitter_factor: 0.0,
                backoff_strategy: BackoffStrategy::Exponential,
            },
            circuit: CircuitConfig::default(),
            dedup: DedupConfig::default(),
            limits: RequestLimits::default(),
            client_timeout: Duration::from_secs(5),
        }
    }
}

impl TestEnvBuilder {
    /// Creates a builder with defaults: one worker, no jitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of relay workers.
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the relay queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Leaves the worker pool stopped so queued events stay queued.
    #[must_use]
    pub fn without_workers(mut self) -> Self {
        self.start_workers = false;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the circuit cooldown.
    #[must_use]
    pub fn circuit_cooldown(mut self, cooldown: Duration) -> Self {
        self.circuit = CircuitConfig { cooldown };
        self
    }

    /// Sets the fast-tier dedup sizing.
    #[must_use]
    pub fn dedup(mut self, config: DedupConfig) -> Self {
        self.dedup = config;
        self
    }

    /// Sets the request limits.
    #[must_use]
    pub fn limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the per-attempt downstream timeout.
    #[must_use]
    pub fn client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Builds the environment and starts the fake API.
    ///
    /// # Errors
    ///
    /// Fails if the relay client cannot be constructed.
    pub async fn build(self) -> Result<TestEnv> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
            )
            .with_test_writer()
            .try_init();

        let capi = FakeCapi::start().await;
        let clock = TestClock::at_unix(TEST_EPOCH);
        let events = InMemoryEventStore::new();
        let credentials = InMemoryCredentialStore::new();

        let dedup = Arc::new(DedupGuard::new(self.dedup, Arc::new(events.clone()), clock.shared()));

        let client = CapiClient::new(ClientConfig {
            base_url: capi.uri(),
            timeout: self.client_timeout,
            ..ClientConfig::default()
        })
        .context("failed to build relay client")?;
        let relayer = Arc::new(Relayer::new(
            client,
            Arc::new(credentials.clone()),
            CircuitBreaker::new(self.circuit, clock.shared()),
            self.retry_policy,
            clock.shared(),
        ));

        let shutdown = CancellationToken::new();
        let (mut pool, queue) = WorkerPool::new(
            relayer.clone(),
            RelayQueueConfig {
                capacity: self.queue_capacity,
                worker_count: self.worker_count,
                shutdown_timeout: Duration::from_secs(5),
            },
            shutdown.clone(),
        );
        if self.start_workers {
            pool.spawn_workers();
        }

        Ok(TestEnv {
            capi,
            clock,
            events,
            credentials,
            dedup,
            relayer,
            queue,
            pool: Some(pool),
            limits: self.limits,
        })
    }
}

/// Pipeline wired against in-memory stores and a fake downstream API.
pub struct TestEnv {
    /// Fake conversions API
    pub capi: FakeCapi,
    /// Clock shared by dedup, relay and handlers
    pub clock: TestClock,
    /// Event store
    pub events: InMemoryEventStore,
    /// Credential store
    pub credentials: InMemoryCredentialStore,
    /// Dedup guard in front of the event store
    pub dedup: Arc<DedupGuard>,
    /// Relayer used by the workers
    pub relayer: Arc<Relayer>,
    /// Producer side of the relay queue
    pub queue: RelayQueue,
    pool: Option<WorkerPool>,
    limits: RequestLimits,
}

impl TestEnv {
    /// Creates an environment with default settings.
    ///
    /// # Errors
    ///
    /// See [`TestEnvBuilder::build`].
    pub async fn new() -> Result<Self> {
        TestEnvBuilder::new().build().await
    }

    /// Returns a builder.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::new()
    }

    /// Registers tenant credentials.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn add_tenant(&self, credential: TenantCredential) -> Result<()> {
        self.credentials.upsert(&credential).await.context("failed to store credentials")
    }

    /// Registers the default tenant with the fake API accepting everything.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn with_default_tenant(&self) -> Result<()> {
        self.capi.accept_all().await;
        self.add_tenant(CredentialBuilder::with_defaults().build()).await
    }

    /// Handler state over this environment.
    pub fn app_state(&self) -> AppState {
        AppState {
            dedup: self.dedup.clone(),
            events: Arc::new(self.events.clone()),
            credentials: Arc::new(self.credentials.clone()),
            relay_queue: self.queue.clone(),
            clock: self.clock.shared(),
            limits: self.limits,
        }
    }

    /// Router over this environment.
    pub fn router(&self) -> Router {
        create_router(self.app_state())
    }

    /// Sends a request through the router.
    ///
    /// # Errors
    ///
    /// Fails if the router or body collection fails.
    pub async fn send(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self.router().oneshot(request).await.context("router call failed")?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("failed to read response body")?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).context("response body is not JSON")?
        };

        Ok(TestResponse { status, headers, body })
    }

    /// Posts a JSON ingestion body for `tenant`.
    ///
    /// # Errors
    ///
    /// See [`Self::send`].
    pub async fn ingest(&self, tenant: &str, body: &Value) -> Result<TestResponse> {
        let request = Request::post("/ingest/events")
            .header("content-type", "application/json")
            .header("x-tenant-key", tenant)
            .body(Body::from(body.to_string()))
            .context("failed to build request")?;
        self.send(request).await
    }

    /// Posts a purchase webhook signed with `secret` at the current test time.
    ///
    /// # Errors
    ///
    /// See [`Self::send`].
    pub async fn signed_webhook(
        &self,
        tenant: &str,
        secret: &str,
        body: &Value,
    ) -> Result<TestResponse> {
        let body = body.to_string();
        let timestamp = self.unix_now();
        let mut builder = Request::post("/webhooks/purchase")
            .header("content-type", "application/json")
            .header("x-tenant-key", tenant);
        for (name, value) in fixtures::signed_headers(secret, timestamp, body.as_bytes()) {
            builder = builder.header(name, value);
        }
        let request = builder.body(Body::from(body)).context("failed to build request")?;
        self.send(request).await
    }

    /// Returns a stored event.
    pub async fn stored(&self, tenant: &str, event_id: &str) -> Option<Event> {
        self.events.get(&TenantKey::from(tenant), &EventId::from(event_id)).await
    }

    /// Current test time in Unix seconds.
    pub fn unix_now(&self) -> i64 {
        self.clock.unix_seconds()
    }

    /// Moves test time forward.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Stops the worker pool, waiting for in-flight relays.
    ///
    /// # Errors
    ///
    /// Fails if workers do not finish within the shutdown timeout.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.shutdown_graceful().await.context("relay shutdown failed")?;
        }
        Ok(())
    }
}

/// Collected router response.
#[derive(Debug)]
pub struct TestResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// JSON body, or `Null` when empty
    pub body: Value,
}

impl TestResponse {
    /// Error code from an error body.
    pub fn error_code(&self) -> Option<&str> {
        self.body.pointer("/error/code").and_then(Value::as_str)
    }
}
