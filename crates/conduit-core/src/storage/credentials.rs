//! Repository for the `tenant_credentials` table.
//!
//! Secrets are stored sealed; this layer never sees plaintext. Decryption
//! happens in [`crate::store::PgCredentialStore`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{error::Result, models::TenantKey};

/// Credential row with sealed secrets.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SealedCredential {
    /// Owning tenant.
    pub tenant_key: TenantKey,
    /// Downstream pixel id.
    pub pixel_id: String,
    /// Sealed access token.
    pub access_token_sealed: String,
    /// Sealed webhook secret.
    pub webhook_secret_sealed: Option<String>,
    /// Test event code forwarded downstream.
    pub test_event_code: Option<String>,
    /// Integration switch.
    pub enabled: bool,
}

/// Repository for tenant credentials.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates or replaces a tenant's credentials.
    ///
    /// Called when a tenant first configures the integration and again on
    /// re-authentication.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub async fn upsert(&self, credential: &SealedCredential) -> Result<DateTime<Utc>> {
        let updated_at = sqlx::query_scalar(
            r"
            INSERT INTO tenant_credentials (
                tenant_key, pixel_id, access_token_sealed, webhook_secret_sealed,
                test_event_code, enabled, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (tenant_key) DO UPDATE SET
                pixel_id = EXCLUDED.pixel_id,
                access_token_sealed = EXCLUDED.access_token_sealed,
                webhook_secret_sealed = EXCLUDED.webhook_secret_sealed,
                test_event_code = EXCLUDED.test_event_code,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
            RETURNING updated_at
            ",
        )
        .bind(&credential.tenant_key)
        .bind(&credential.pixel_id)
        .bind(&credential.access_token_sealed)
        .bind(&credential.webhook_secret_sealed)
        .bind(&credential.test_event_code)
        .bind(credential.enabled)
        .fetch_one(&*self.pool)
        .await?;

        Ok(updated_at)
    }

    /// Finds a tenant's credentials.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find(&self, tenant_key: &TenantKey) -> Result<Option<SealedCredential>> {
        let credential = sqlx::query_as::<_, SealedCredential>(
            r"
            SELECT tenant_key, pixel_id, access_token_sealed, webhook_secret_sealed,
                   test_event_code, enabled
            FROM tenant_credentials
            WHERE tenant_key = $1
            ",
        )
        .bind(tenant_key)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(credential)
    }
}
