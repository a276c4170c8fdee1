//! PostgreSQL access for repository tests.
//!
//! Connects to `DATABASE_URL` and bootstraps the production schema. When the
//! variable is unset, [`TestDatabase::from_env`] returns `None` and the
//! calling test returns early, so the in-memory suite still runs anywhere.
//! Tests share one database and stay apart through unique tenant keys.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use conduit_core::storage::Storage;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, warn};
use uuid::Uuid;

/// Handle to a migrated test database.
pub struct TestDatabase {
    storage: Arc<Storage>,
}

impl TestDatabase {
    /// Connects and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Fails if `DATABASE_URL` is set but unusable.
    pub async fn from_env() -> Result<Option<Self>> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            warn!("DATABASE_URL not set, skipping database test");
            return Ok(None);
        };

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&database_url)
            .await
            .context("failed to connect to DATABASE_URL")?;

        let storage = Arc::new(Storage::new(pool));
        storage.bootstrap_schema().await.context("failed to bootstrap test schema")?;
        debug!("test database ready");

        Ok(Some(Self { storage }))
    }

    /// Repositories over the test database.
    pub fn storage(&self) -> Arc<Storage> {
        self.storage.clone()
    }

    /// Tenant key no other test run will use.
    pub fn unique_tenant(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4().simple())
    }
}
