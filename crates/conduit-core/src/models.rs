//! Core domain models and strongly-typed identifiers.
//!
//! Defines the canonical event relayed downstream, the tenant credential
//! record, and the outcomes reported by deduplication and ingestion.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Opaque tenant identifier.
///
/// Every event, credential and circuit is scoped to one tenant key. The key
/// is chosen by the tenant's integration and never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantKey(pub String);

impl TenantKey {
    /// Creates a tenant key from any string-like value.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for TenantKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl sqlx::Type<PgDb> for TenantKey {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for TenantKey {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let key = <String as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(key))
    }
}

impl sqlx::Encode<'_, PgDb> for TenantKey {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Idempotency key of an event, unique per tenant.
///
/// Callers usually supply their own; when they don't, a random UUID v4 string
/// is generated at ingestion. Either way the same key is sent on every relay
/// attempt so the downstream API can deduplicate too.
///
/// # Example
///
/// ```
/// use conduit_core::models::EventId;
/// let generated = EventId::generate();
/// assert_eq!(generated.as_str().len(), 36);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Generates a fresh random event id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <String as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Where an event entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Client-side pixel posting to the ingestion endpoint.
    Pixel,
    /// Commerce platform webhook.
    Webhook,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pixel => write!(f, "pixel"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

impl std::str::FromStr for EventSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pixel" => Ok(Self::Pixel),
            "webhook" => Ok(Self::Webhook),
            other => Err(format!("unknown event source: {other}")),
        }
    }
}

/// Identity and client context attached to an event.
///
/// Identity fields hold lowercase SHA-256 hex digests and are only ever
/// populated through [`crate::pii::canonicalize`]. Client context fields are
/// passed through verbatim because the downstream API matches on them
/// unhashed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    /// Hashed email address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Hashed phone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Hashed first name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Hashed last name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Hashed city.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Hashed state or region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Hashed postal code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    /// Hashed country.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Hashed birth date (YYYYMMDD).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    /// Hashed external customer id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Client IP address, unhashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip_address: Option<String>,
    /// Client user agent, unhashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_user_agent: Option<String>,
    /// Browser id cookie, unhashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbp: Option<String>,
    /// Click id cookie, unhashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbc: Option<String>,
}

impl UserData {
    /// Returns true when no field is populated.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Canonical unit relayed downstream.
///
/// Immutable once created. The pair `(tenant_key, event_id)` is unique in
/// durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Owning tenant.
    pub tenant_key: TenantKey,
    /// Event name such as `PageView`, `Lead` or `Purchase`.
    pub event_name: String,
    /// Idempotency key.
    pub event_id: EventId,
    /// Seconds since the Unix epoch.
    pub event_time: i64,
    /// Page the event happened on.
    pub event_source_url: Option<String>,
    /// Hashed identity and client context.
    pub user_data: UserData,
    /// Free-form custom data passed through to the downstream API.
    pub custom_data: Map<String, Value>,
    /// Request body as received, retained for audit.
    pub raw_payload: Value,
    /// Entry point of the event.
    pub source: EventSource,
    /// Server receipt time.
    pub received_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for Event {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let user_data: sqlx::types::Json<UserData> = row.try_get("user_data")?;
        let custom_data: sqlx::types::Json<Map<String, Value>> = row.try_get("custom_data")?;
        let raw_payload: sqlx::types::Json<Value> = row.try_get("raw_payload")?;
        let source: String = row.try_get("source")?;

        Ok(Self {
            tenant_key: row.try_get("tenant_key")?,
            event_name: row.try_get("event_name")?,
            event_id: row.try_get("event_id")?,
            event_time: row.try_get("event_time")?,
            event_source_url: row.try_get("event_source_url")?,
            user_data: user_data.0,
            custom_data: custom_data.0,
            raw_payload: raw_payload.0,
            source: source.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            received_at: row.try_get("received_at")?,
        })
    }
}

/// Result of the uniqueness-constrained insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First time this key was stored.
    Inserted,
    /// Key already present; nothing was written.
    Duplicate,
}

/// Status reported to ingestion callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Stored and queued for relay.
    Received,
    /// Seen before; nothing done.
    IgnoredDuplicate,
    /// Tenant has no enabled integration; nothing done.
    Ignored,
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::IgnoredDuplicate => write!(f, "ignored_duplicate"),
            Self::Ignored => write!(f, "ignored"),
        }
    }
}

/// Decrypted tenant integration record.
///
/// Produced by the credential store on each read; secrets never leave the
/// process in this form.
#[derive(Clone, PartialEq, Eq)]
pub struct TenantCredential {
    /// Owning tenant.
    pub tenant_key: TenantKey,
    /// Downstream pixel (dataset) id.
    pub pixel_id: String,
    /// Downstream access token.
    pub access_token: String,
    /// Shared secret for webhook authentication.
    pub webhook_secret: Option<String>,
    /// Forwarded downstream for test traffic routing.
    pub test_event_code: Option<String>,
    /// Disabled integrations receive no relays.
    pub enabled: bool,
}

impl fmt::Debug for TenantCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantCredential")
            .field("tenant_key", &self.tenant_key)
            .field("pixel_id", &self.pixel_id)
            .field("access_token", &"<redacted>")
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("test_event_code", &self.test_event_code)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_status_serializes_snake_case() {
        let json = serde_json::to_string(&IngestStatus::IgnoredDuplicate).unwrap();
        assert_eq!(json, "\"ignored_duplicate\"");
        assert_eq!(IngestStatus::Received.to_string(), "received");
    }

    #[test]
    fn event_source_parses_its_display_form() {
        for source in [EventSource::Pixel, EventSource::Webhook] {
            assert_eq!(source.to_string().parse::<EventSource>().unwrap(), source);
        }
        assert!("email".parse::<EventSource>().is_err());
    }

    #[test]
    fn credential_debug_redacts_secrets() {
        let credential = TenantCredential {
            tenant_key: TenantKey::from("t1"),
            pixel_id: "123456789".into(),
            access_token: "EAAB-very-secret".into(),
            webhook_secret: Some("whsec".into()),
            test_event_code: None,
            enabled: true,
        };

        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("EAAB-very-secret"));
        assert!(!rendered.contains("whsec"));
        assert!(rendered.contains("123456789"));
    }

    #[test]
    fn empty_user_data_serializes_to_empty_object() {
        assert!(UserData::default().is_empty());
        assert_eq!(serde_json::to_value(UserData::default()).unwrap(), serde_json::json!({}));
    }
}
