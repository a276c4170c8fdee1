//! PostgreSQL repositories.
//!
//! All SQL lives in this module. Each repository shares one pool, and every
//! write that can race goes through a uniqueness-constrained statement so
//! concurrent instances never need application-level locks.

use std::sync::Arc;

use sqlx::PgPool;

pub mod credentials;
pub mod events;

use crate::error::Result;

/// Advisory lock key serializing schema creation across processes.
const SCHEMA_LOCK_KEY: i64 = 0x636f_6e64_7569_74;

const SCHEMA: [&str; 3] = [
    r"
    CREATE TABLE IF NOT EXISTS events (
        tenant_key TEXT NOT NULL,
        event_id TEXT NOT NULL,
        event_name TEXT NOT NULL,
        event_time BIGINT NOT NULL,
        event_source_url TEXT,
        user_data JSONB NOT NULL,
        custom_data JSONB NOT NULL,
        raw_payload JSONB NOT NULL,
        source TEXT NOT NULL,
        received_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (tenant_key, event_id)
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_events_tenant_received
    ON events(tenant_key, received_at DESC)
    ",
    r"
    CREATE TABLE IF NOT EXISTS tenant_credentials (
        tenant_key TEXT PRIMARY KEY,
        pixel_id TEXT NOT NULL,
        access_token_sealed TEXT NOT NULL,
        webhook_secret_sealed TEXT,
        test_event_code TEXT,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
];

/// Container for all repository instances.
#[derive(Clone)]
pub struct Storage {
    pool: Arc<PgPool>,

    /// Event table access.
    pub events: Arc<events::Repository>,

    /// Tenant credential table access.
    pub credentials: Arc<credentials::Repository>,
}

impl Storage {
    /// Creates a storage instance over the given pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            events: Arc::new(events::Repository::new(pool.clone())),
            credentials: Arc::new(credentials::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Creates the tables and indexes if they are missing.
    ///
    /// Runs in one transaction under an advisory lock, so instances starting
    /// together do not race on catalog entries.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` on the first statement that fails.
    pub async fn bootstrap_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Verifies database connectivity with `SELECT 1`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;

        Ok(())
    }
}
