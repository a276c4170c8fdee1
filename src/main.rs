//! Conduit conversions relay.
//!
//! Main entry point. Loads configuration, prepares the database, starts the
//! relay workers and serves HTTP until a shutdown signal arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use conduit_api::{start_server, AppState, Config};
use conduit_core::{
    storage::Storage,
    store::{PgCredentialStore, PgEventStore},
    CredentialStore, DedupGuard, EventStore, RealClock, SecretCipher,
};
use conduit_relay::{CapiClient, CircuitBreaker, Relayer, WorkerPool};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!("Starting conduit conversions relay");
    info!(config = ?config, "Configuration loaded");

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    let storage = Arc::new(Storage::new(db_pool.clone()));
    storage.bootstrap_schema().await.context("Failed to create database schema")?;
    info!("Database schema ready");

    let key = config
        .encryption_key
        .as_deref()
        .context("ENCRYPTION_KEY must be set to a base64-encoded 32-byte key")?;
    let cipher = SecretCipher::from_base64_key(key).context("Invalid ENCRYPTION_KEY")?;

    let clock = RealClock::shared();
    let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(storage.clone()));
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(PgCredentialStore::new(storage, cipher));

    let relayer = Arc::new(Relayer::new(
        CapiClient::new(config.to_client_config()).context("Failed to build relay client")?,
        credentials.clone(),
        CircuitBreaker::new(config.to_circuit_config(), clock.clone()),
        config.to_retry_policy(),
        clock.clone(),
    ));

    let shutdown = CancellationToken::new();
    let (mut workers, relay_queue) =
        WorkerPool::new(relayer, config.to_queue_config(), shutdown.child_token());
    workers.spawn_workers();

    let state = AppState {
        dedup: Arc::new(DedupGuard::new(config.to_dedup_config(), events.clone(), clock.clone())),
        events,
        credentials,
        relay_queue,
        clock,
        limits: config.to_request_limits(),
    };

    let addr = config.parse_server_addr()?;
    info!(addr = %addr, "Conduit is ready to receive events");

    if let Err(e) = start_server(state, addr, shutdown.clone()).await {
        error!(error = %e, "Server failed");
    }

    info!("HTTP server stopped, draining relay workers");
    if let Err(e) = workers.shutdown_graceful().await {
        warn!(error = %e, "Relay workers did not stop cleanly");
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("Conduit shutdown complete");
    Ok(())
}

/// Initializes tracing; `RUST_LOG` wins over the configured filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Creates the database connection pool, retrying while the database starts.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(config.database_idle_timeout))
            .max_lifetime(Duration::from_secs(config.database_max_lifetime))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("Failed to verify database connection")?;
                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    database_url = %config.database_url_masked(),
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
