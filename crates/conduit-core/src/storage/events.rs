//! Repository for the `events` table.
//!
//! The table's primary key is `(tenant_key, event_id)`. Inserts use
//! `ON CONFLICT DO NOTHING` and report whether a row was written, which makes
//! the insert itself the durable deduplication check.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Event, EventId, InsertOutcome, TenantKey},
};

/// Repository for event persistence.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts the event unless its key already exists.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails for any reason other than the key
    /// being present.
    pub async fn insert_if_absent(&self, event: &Event) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r"
            INSERT INTO events (
                tenant_key, event_id, event_name, event_time, event_source_url,
                user_data, custom_data, raw_payload, source, received_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            )
            ON CONFLICT (tenant_key, event_id) DO NOTHING
            ",
        )
        .bind(&event.tenant_key)
        .bind(&event.event_id)
        .bind(&event.event_name)
        .bind(event.event_time)
        .bind(&event.event_source_url)
        .bind(sqlx::types::Json(&event.user_data))
        .bind(sqlx::types::Json(&event.custom_data))
        .bind(sqlx::types::Json(&event.raw_payload))
        .bind(event.source.to_string())
        .bind(event.received_at)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    /// Reads back a stored event.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a stored column no longer decodes.
    pub async fn find(&self, tenant_key: &TenantKey, event_id: &EventId) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(
            r"
            SELECT tenant_key, event_id, event_name, event_time, event_source_url,
                   user_data, custom_data, raw_payload, source, received_at
            FROM events
            WHERE tenant_key = $1 AND event_id = $2
            ",
        )
        .bind(tenant_key)
        .bind(event_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }
}
