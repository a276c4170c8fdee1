//! HTTP client for the conversions API.
//!
//! One call is one attempt. The client sends the request, reads a bounded
//! amount of the response, and classifies the outcome into [`RelayError`]
//! variants so the relay can decide between retrying, giving up, and
//! disabling the tenant.

use std::time::{Duration, Instant};

use reqwest::{header::HeaderMap, StatusCode};
use serde::Deserialize;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{RelayError, Result},
    payload::CapiRequest,
};

const MAX_ERROR_BODY: usize = 1024;

/// Downstream error codes that indicate a temporary condition.
const TRANSIENT_API_CODES: &[i64] = &[1, 2, 341];

/// Downstream error codes that indicate throttling.
const THROTTLE_API_CODES: &[i64] = &[4, 17, 32, 613];

/// Downstream error code for an invalid or expired access token.
const INVALID_TOKEN_API_CODE: i64 = 190;

/// Configuration for the conversions API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Scheme and host of the API, without trailing slash.
    pub base_url: String,
    /// API version path segment, e.g. `v21.0`.
    pub api_version: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com".to_string(),
            api_version: "v21.0".to_string(),
            timeout: Duration::from_secs(10),
            user_agent: concat!("conduit-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Successful attempt.
#[derive(Debug, Clone)]
pub struct CapiResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Events the API reports as received.
    pub events_received: Option<u64>,
    /// Downstream trace id.
    pub fbtrace_id: Option<String>,
    /// Round-trip time.
    pub duration: Duration,
}

#[derive(Debug, Deserialize)]
struct SuccessBody {
    events_received: Option<u64>,
    fbtrace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i64>,
    #[serde(default)]
    is_transient: bool,
}

/// Conversions API client with connection pooling.
#[derive(Debug, Clone)]
pub struct CapiClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl CapiClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| RelayError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Events endpoint for a pixel.
    pub fn events_url(&self, pixel_id: &str) -> String {
        format!(
            "{}/{}/{}/events",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            pixel_id
        )
    }

    /// Performs one attempt.
    ///
    /// # Errors
    ///
    /// Returns the classified failure:
    /// - `Network` / `Timeout` when no response arrived
    /// - `InvalidToken` for HTTP 401 or API code 190
    /// - `RateLimited` for HTTP 429 or throttling codes
    /// - `ServerError` for 5xx or transient codes
    /// - `Rejected` for any other non-2xx
    pub async fn send(
        &self,
        pixel_id: &str,
        request: &CapiRequest,
        attempt: u32,
    ) -> Result<CapiResponse> {
        let span = info_span!(
            "capi_send",
            pixel_id = %pixel_id,
            attempt,
            events = request.data.len(),
        );

        async move {
            let start = Instant::now();

            let response = match self.client.post(self.events_url(pixel_id)).json(request).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(duration_ms = start.elapsed().as_millis(), error = %e, "request failed");
                    if e.is_timeout() {
                        return Err(RelayError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(RelayError::network(format!("connection failed: {e}")));
                    }
                    return Err(RelayError::network(e.to_string()));
                },
            };

            let status = response.status();
            let retry_after = extract_retry_after_seconds(response.headers());
            let body = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(status = status.as_u16(), error = %e, "failed to read response body");
                    if status.is_success() {
                        bytes::Bytes::new()
                    } else {
                        return Err(RelayError::network(format!("failed to read body: {e}")));
                    }
                },
            };
            let duration = start.elapsed();

            debug!(status = status.as_u16(), duration_ms = duration.as_millis(), "received response");

            if status.is_success() {
                let parsed: Option<SuccessBody> = serde_json::from_slice(&body).ok();
                return Ok(CapiResponse {
                    status_code: status.as_u16(),
                    events_received: parsed.as_ref().and_then(|b| b.events_received),
                    fbtrace_id: parsed.and_then(|b| b.fbtrace_id),
                    duration,
                });
            }

            Err(classify_failure(status, retry_after, &body))
        }
        .instrument(span)
        .await
    }
}

/// Maps a non-2xx response to a relay error.
pub fn classify_failure(status: StatusCode, retry_after: Option<u64>, body: &[u8]) -> RelayError {
    let api_error = serde_json::from_slice::<ErrorEnvelope>(body).ok().map(|e| e.error);
    let api_code = api_error.as_ref().and_then(|e| e.code);
    let is_transient = api_error.as_ref().is_some_and(|e| e.is_transient);
    let status_code = status.as_u16();

    if status == StatusCode::UNAUTHORIZED || api_code == Some(INVALID_TOKEN_API_CODE) {
        return RelayError::InvalidToken { status_code, api_code };
    }

    if status == StatusCode::TOO_MANY_REQUESTS
        || api_code.is_some_and(|code| THROTTLE_API_CODES.contains(&code))
    {
        return RelayError::RateLimited { retry_after_seconds: retry_after };
    }

    if status.is_server_error()
        || is_transient
        || api_code.is_some_and(|code| TRANSIENT_API_CODES.contains(&code))
    {
        return RelayError::server_error(status_code, truncate_body(body));
    }

    RelayError::rejected(status_code, truncate_body(body))
}

fn truncate_body(body: &[u8]) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return String::from_utf8_lossy(body).into_owned();
    }
    let suffix = "... (truncated)";
    let truncated = String::from_utf8_lossy(&body[..MAX_ERROR_BODY - suffix.len()]);
    format!("{truncated}{suffix}")
}

/// Extracts the Retry-After delay in seconds.
///
/// Accepts both delta-seconds and HTTP-date forms. A date in the past yields
/// zero; an unparseable value yields `None` so normal backoff applies.
pub fn extract_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&chrono::Utc).signed_duration_since(chrono::Utc::now());
    Some(delta.to_std().map(|d| d.as_secs()).unwrap_or(0))
}
