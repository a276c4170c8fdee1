//! Fake conversions API backed by a wiremock server.
//!
//! Responses are scripted per test. Mocks are matched in mount order, so a
//! limited failure mounted before an unlimited success produces a
//! fail-then-recover sequence.

use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::{json, Value};
use wiremock::{
    matchers::{method, path_regex},
    Mock, MockServer, ResponseTemplate,
};

/// Path pattern for `POST /{version}/{pixel_id}/events`.
const EVENTS_PATH: &str = r"^/v[0-9.]+/[0-9]+/events$";

/// Scriptable stand-in for the downstream API.
pub struct FakeCapi {
    server: MockServer,
}

impl FakeCapi {
    /// Starts a server with no mounted responses.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL to configure the relay client with.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Accepts every event.
    pub async fn accept_all(&self) {
        self.mount(success(), None).await;
    }

    /// Accepts every event after `delay`.
    pub async fn accept_after(&self, delay: Duration) {
        self.mount(success().set_delay(delay), None).await;
    }

    /// Answers the next `times` requests with HTTP 500.
    pub async fn fail_with_server_error(&self, times: u64) {
        let body = json!({"error": {"message": "internal", "code": 2, "is_transient": true}});
        self.mount(ResponseTemplate::new(500).set_body_json(body), Some(times)).await;
    }

    /// Rejects every request as carrying an invalid access token (code 190).
    pub async fn reject_token(&self) {
        let body = json!({
            "error": {
                "message": "Error validating access token",
                "type": "OAuthException",
                "code": 190,
            }
        });
        self.mount(ResponseTemplate::new(400).set_body_json(body), None).await;
    }

    /// Answers every request with a non-retryable validation error.
    pub async fn reject_payload(&self) {
        let body = json!({"error": {"message": "Invalid parameter", "code": 100}});
        self.mount(ResponseTemplate::new(400).set_body_json(body), None).await;
    }

    /// Forgets all mounted responses and recorded requests.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of requests received so far.
    pub async fn request_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |requests| requests.len())
    }

    /// JSON bodies of all requests received so far.
    pub async fn received_bodies(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|request| serde_json::from_slice(&request.body).ok())
            .collect()
    }

    /// Waits until at least `expected` requests have arrived.
    ///
    /// # Errors
    ///
    /// Fails if the count is not reached within `timeout`.
    pub async fn wait_for_requests(&self, expected: usize, timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let count = self.request_count().await;
            if count >= expected {
                return Ok(count);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("expected {expected} downstream requests, saw {count}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn mount(&self, response: ResponseTemplate, times: Option<u64>) {
        let mock = Mock::given(method("POST")).and(path_regex(EVENTS_PATH)).respond_with(response);
        let mock = match times {
            Some(n) => mock.up_to_n_times(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }
}

fn success() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(json!({"events_received": 1, "messages": [], "fbtrace_id": "AbCdEf123"}))
}
