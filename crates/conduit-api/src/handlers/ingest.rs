//! Event ingestion: `POST /ingest/events`.
//!
//! A JSON object is one event; a JSON array is a batch processed item by
//! item, where a bad item is reported in its slot and never fails the rest.
//! Either way the response means "accepted for processing": relay runs
//! detached and its outcome is never reported here.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use conduit_core::{ConduitError, EventSource, IngestStatus, TenantKey};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, field, info, instrument, warn, Span};

use crate::{
    error::{ApiError, ErrorDetail},
    extract::{self, QueryParams},
    pipeline,
    validation::IngestRequest,
    AppState,
};

/// Response for a single event.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Processing status
    pub status: IngestStatus,
    /// Supplied or generated idempotency key
    pub event_id: String,
}

/// Response for a batch.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    /// One entry per submitted item, in order
    pub results: Vec<BatchItemResult>,
}

/// Status of one batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    /// Stored and queued for relay
    Received,
    /// Seen before
    IgnoredDuplicate,
    /// Tenant integration not enabled
    Ignored,
    /// Item rejected; see `error`
    Error,
}

impl From<IngestStatus> for BatchItemStatus {
    fn from(status: IngestStatus) -> Self {
        match status {
            IngestStatus::Received => Self::Received,
            IngestStatus::IgnoredDuplicate => Self::IgnoredDuplicate,
            IngestStatus::Ignored => Self::Ignored,
        }
    }
}

/// Result for one batch item.
#[derive(Debug, Serialize)]
pub struct BatchItemResult {
    /// Position in the submitted array
    pub index: usize,
    /// Item status
    pub status: BatchItemStatus,
    /// Idempotency key, when the item got far enough to have one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Why the item was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Ingests one event or a batch.
///
/// # Errors
///
/// - 400: missing tenant, malformed JSON, invalid event, bad batch size
/// - 413: body over the configured limit
/// - 500: storage failure (single-event form only)
#[instrument(name = "ingest_events", skip_all, fields(tenant_key = field::Empty, batch = field::Empty))]
pub async fn ingest_events(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let tenant_key = extract::tenant_key(&headers, &params)?;
    Span::current().record("tenant_key", tenant_key.as_str());

    let body = extract::read_body(&headers, body, state.limits.max_payload_bytes).await?;
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ConduitError::invalid_payload(format!("malformed JSON: {e}")))?;

    match payload {
        Value::Array(items) => {
            Span::current().record("batch", items.len());
            let response = ingest_batch(&state, &tenant_key, items).await?;
            Ok((StatusCode::ACCEPTED, Json(response)).into_response())
        },
        value => {
            let response = ingest_single(&state, tenant_key, value).await?;
            Ok((StatusCode::ACCEPTED, Json(response)).into_response())
        },
    }
}

async fn ingest_single(
    state: &AppState,
    tenant_key: TenantKey,
    value: Value,
) -> Result<IngestResponse, ConduitError> {
    let enabled = integration_enabled(state, &tenant_key).await?;
    let (status, event_id) = process(state, tenant_key, value, enabled).await?;

    Ok(IngestResponse { status, event_id })
}

async fn ingest_batch(
    state: &AppState,
    tenant_key: &TenantKey,
    items: Vec<Value>,
) -> Result<BatchResponse, ConduitError> {
    if items.is_empty() {
        return Err(ConduitError::invalid_payload("batch is empty"));
    }
    if items.len() > state.limits.max_batch_size {
        return Err(ConduitError::invalid_payload(format!(
            "batch of {} items exceeds limit of {}",
            items.len(),
            state.limits.max_batch_size
        )));
    }

    // A failed lookup marks every slot with the same error.
    let lookup = integration_enabled(state, tenant_key).await.map_err(|error| {
        warn!(error = %error, "credential lookup failed for batch");
        ApiError(error).to_body().error
    });
    let mut results = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        let outcome = match &lookup {
            Ok(enabled) => process(state, tenant_key.clone(), item, *enabled)
                .await
                .map_err(|error| {
                    debug!(index, error = %error, "batch item rejected");
                    ApiError(error).to_body().error
                }),
            Err(detail) => Err(detail.clone()),
        };

        results.push(match outcome {
            Ok((status, event_id)) => BatchItemResult {
                index,
                status: status.into(),
                event_id: Some(event_id),
                error: None,
            },
            Err(detail) => BatchItemResult {
                index,
                status: BatchItemStatus::Error,
                event_id: None,
                error: Some(detail),
            },
        });
    }

    info!(
        items = results.len(),
        rejected = results.iter().filter(|r| r.status == BatchItemStatus::Error).count(),
        "batch processed"
    );

    Ok(BatchResponse { results })
}

/// Validates, canonicalizes and admits one event.
async fn process(
    state: &AppState,
    tenant_key: TenantKey,
    value: Value,
    enabled: bool,
) -> Result<(IngestStatus, String), ConduitError> {
    let received_at = DateTime::<Utc>::from(state.clock.now_system());
    let validated =
        IngestRequest::from_value(&value)?.validate(received_at.timestamp()).into_result()?;
    let event = validated.into_event(tenant_key, value, EventSource::Pixel, received_at);
    let event_id = event.event_id.to_string();

    if !enabled {
        debug!(event_id = %event_id, "no enabled integration, event ignored");
        return Ok((IngestStatus::Ignored, event_id));
    }

    let status = pipeline::accept(state, event).await?;
    Ok((status, event_id))
}

async fn integration_enabled(state: &AppState, tenant_key: &TenantKey) -> Result<bool, ConduitError> {
    Ok(pipeline::credential(state, tenant_key).await?.is_some_and(|c| c.enabled))
}
