//! Purchase webhook: `POST /webhooks/purchase`.
//!
//! Authentication runs on the raw body before anything is parsed. A request
//! that fails it is answered with 401 and leaves no trace beyond a log line.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use conduit_core::{ConduitError, IngestStatus};
use serde::Serialize;
use serde_json::Value;
use tracing::{field, info, instrument, Span};

use crate::{
    error::ApiError,
    extract::{self, QueryParams},
    pipeline,
    platforms::Platform,
    signature::{SignatureError, WebhookAuth},
    AppState,
};

/// Response for an accepted webhook.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Always true on 200
    pub success: bool,
    /// True if this order was already processed
    pub deduped: bool,
}

/// Accepts a purchase webhook.
///
/// # Errors
///
/// - 400: missing tenant, malformed body, unknown platform, missing order id
/// - 401: missing, stale or invalid signature or token
/// - 413: body over the configured limit
/// - 500: storage failure
#[instrument(
    name = "purchase_webhook",
    skip_all,
    fields(tenant_key = field::Empty, auth_mode = field::Empty, platform = field::Empty)
)]
pub async fn purchase_webhook(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let span = Span::current();

    let tenant_key = extract::tenant_key(&headers, &params)?;
    span.record("tenant_key", tenant_key.as_str());

    let body = extract::read_body(&headers, body, state.limits.max_payload_bytes).await?;

    let auth = WebhookAuth::from_request(&headers, params.token.as_deref())
        .map_err(ConduitError::from)?;
    span.record("auth_mode", auth.mode());

    let credential = pipeline::credential(&state, &tenant_key)
        .await?
        .ok_or(ConduitError::from(SignatureError::SecretNotConfigured))?;
    let secret = credential
        .webhook_secret
        .as_deref()
        .ok_or(ConduitError::from(SignatureError::SecretNotConfigured))?;

    auth.verify(secret, &body, state.clock.unix_seconds(), state.limits.webhook_tolerance)
        .map_err(ConduitError::from)?;

    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(ConduitError::invalid_payload("webhook body must be a JSON object").into()),
        Err(e) => return Err(ConduitError::invalid_payload(format!("malformed JSON: {e}")).into()),
    };

    let platform = extract::platform_name(&headers, &params)
        .map(str::parse::<Platform>)
        .transpose()?
        .unwrap_or_default();
    span.record("platform", field::debug(platform));

    let order = platform.map(&payload)?;
    let received_at = DateTime::<Utc>::from(state.clock.now_system());
    let event = order.into_event(tenant_key, Value::Object(payload), received_at);

    if !credential.enabled {
        info!(event_id = %event.event_id, "integration disabled, purchase ignored");
        return Ok(accepted(false));
    }

    let status = pipeline::accept(&state, event).await?;
    Ok(accepted(status == IngestStatus::IgnoredDuplicate))
}

fn accepted(deduped: bool) -> Response {
    (StatusCode::OK, Json(WebhookResponse { success: true, deduped })).into_response()
}
