//! Test data builders and canned payloads.

use chrono::{DateTime, Utc};
use conduit_api::signature::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use conduit_core::{pii, Event, EventId, EventSource, TenantCredential, TenantKey};
use serde_json::{json, Map, Value};

/// Tenant used when a test does not care which one.
pub const DEFAULT_TENANT: &str = "acme-store";

/// Pixel id accepted by credential validation.
pub const DEFAULT_PIXEL_ID: &str = "1234567890123";

/// Access token accepted by credential validation.
pub const DEFAULT_ACCESS_TOKEN: &str = "EAAGm0PX4ZCpsBAtestTokenValue0123456789";

/// Webhook secret configured on default credentials.
pub const DEFAULT_WEBHOOK_SECRET: &str = "whsec_5f2b0c1d9e8a7f6b";

/// Builder for tenant credentials.
pub struct CredentialBuilder {
    credential: TenantCredential,
}

impl CredentialBuilder {
    /// Enabled credentials for [`DEFAULT_TENANT`] with a webhook secret.
    pub fn with_defaults() -> Self {
        Self {
            credential: TenantCredential {
                tenant_key: TenantKey::from(DEFAULT_TENANT),
                pixel_id: DEFAULT_PIXEL_ID.to_string(),
                access_token: DEFAULT_ACCESS_TOKEN.to_string(),
                webhook_secret: Some(DEFAULT_WEBHOOK_SECRET.to_string()),
                test_event_code: None,
                enabled: true,
            },
        }
    }

    /// Sets the tenant key.
    #[must_use]
    pub fn tenant(mut self, tenant_key: impl Into<String>) -> Self {
        self.credential.tenant_key = TenantKey::new(tenant_key);
        self
    }

    /// Sets the pixel id.
    #[must_use]
    pub fn pixel_id(mut self, pixel_id: impl Into<String>) -> Self {
        self.credential.pixel_id = pixel_id.into();
        self
    }

    /// Sets the access token.
    #[must_use]
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.credential.access_token = token.into();
        self
    }

    /// Removes the webhook secret.
    #[must_use]
    pub fn without_webhook_secret(mut self) -> Self {
        self.credential.webhook_secret = None;
        self
    }

    /// Sets the test event code.
    #[must_use]
    pub fn test_event_code(mut self, code: impl Into<String>) -> Self {
        self.credential.test_event_code = Some(code.into());
        self
    }

    /// Marks the integration disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.credential.enabled = false;
        self
    }

    /// Returns the credential.
    pub fn build(self) -> TenantCredential {
        self.credential
    }
}

/// Ingestion body for a `Lead` with an email address.
pub fn lead_payload(event_id: &str, email: &str) -> Value {
    json!({
        "event_name": "Lead",
        "event_id": event_id,
        "event_source_url": "https://shop.example.com/signup",
        "user_data": {
            "email": email,
            "client_ip_address": "203.0.113.7",
            "client_user_agent": "Mozilla/5.0",
        },
        "custom_data": {"form": "newsletter"},
    })
}

/// Ingestion body for a `PageView` without identity.
pub fn page_view_payload(event_id: &str) -> Value {
    json!({
        "event_name": "PageView",
        "event_id": event_id,
        "event_source_url": "https://shop.example.com/",
    })
}

/// Shopify `orders/create` body.
pub fn shopify_order(order_id: u64, total: &str) -> Value {
    json!({
        "id": order_id,
        "total_price": total,
        "currency": "BRL",
        "created_at": "2023-11-14T22:13:20Z",
        "email": "Buyer@Example.com",
        "customer": {"first_name": "Ana", "last_name": "Souza", "phone": "(11) 98765-4321"},
        "line_items": [
            {"product_id": 111, "quantity": 2},
            {"product_id": 222, "quantity": 1},
        ],
    })
}

/// Generic purchase body.
pub fn generic_order(order_id: &str, value: f64) -> Value {
    json!({
        "order_id": order_id,
        "value": value,
        "currency": "USD",
        "email": "buyer@example.com",
    })
}

/// Stored event built directly, bypassing HTTP validation.
pub fn event(tenant_key: &str, event_id: &str, received_at: DateTime<Utc>) -> Event {
    let mut identity = Map::new();
    identity.insert("email".to_string(), Value::from("lead@example.com"));

    Event {
        tenant_key: TenantKey::from(tenant_key),
        event_name: "Lead".to_string(),
        event_id: EventId::from(event_id.to_string()),
        event_time: received_at.timestamp(),
        event_source_url: Some("https://shop.example.com/".to_string()),
        user_data: pii::canonicalize(&identity),
        custom_data: Map::new(),
        raw_payload: json!({"event_name": "Lead", "event_id": event_id}),
        source: EventSource::Pixel,
        received_at,
    }
}

/// HMAC headers for a webhook body signed at `timestamp`.
pub fn signed_headers(secret: &str, timestamp: i64, body: &[u8]) -> Vec<(&'static str, String)> {
    let timestamp = timestamp.to_string();
    let signature = signature::sign(secret, &timestamp, body).unwrap_or_default();
    vec![(TIMESTAMP_HEADER, timestamp), (SIGNATURE_HEADER, format!("sha256={signature}"))]
}
