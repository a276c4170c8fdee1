//! Typed ingestion request and its validation step.

use chrono::{DateTime, Utc};
use conduit_core::{pii, ConduitError, Event, EventId, EventSource, TenantKey};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Longest accepted event name.
pub const MAX_EVENT_NAME_LEN: usize = 100;

/// Longest accepted caller-supplied event id.
pub const MAX_EVENT_ID_LEN: usize = 255;

/// Body of `POST /ingest/events`, or one element of a batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    /// Event name; required.
    pub event_name: Option<String>,
    /// Idempotency key; generated when absent.
    pub event_id: Option<String>,
    /// Seconds since the Unix epoch; receipt time when absent.
    pub event_time: Option<i64>,
    /// Page the event happened on.
    pub event_source_url: Option<String>,
    /// Raw identity fields, long or short names.
    #[serde(default)]
    pub user_data: Map<String, Value>,
    /// Custom parameters.
    #[serde(default)]
    pub custom_data: Map<String, Value>,
}

/// Request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    /// Trimmed event name.
    pub event_name: String,
    /// Supplied or generated idempotency key.
    pub event_id: EventId,
    /// Event time in Unix seconds.
    pub event_time: i64,
    /// Page URL, if any.
    pub event_source_url: Option<String>,
    /// Raw identity fields, not yet hashed.
    pub user_data: Map<String, Value>,
    /// Custom parameters.
    pub custom_data: Map<String, Value>,
}

/// Outcome of [`IngestRequest::validate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// Request is well-formed.
    Valid(ValidatedEvent),
    /// Request is rejected.
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl ValidationResult {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }

    /// Converts into a `Result` carrying the coded client error.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::InvalidPayload` for an invalid request.
    pub fn into_result(self) -> Result<ValidatedEvent, ConduitError> {
        match self {
            Self::Valid(event) => Ok(event),
            Self::Invalid { field, reason } => {
                Err(ConduitError::invalid_payload(format!("{field}: {reason}")))
            },
        }
    }
}

impl IngestRequest {
    /// Parses one JSON value into a request.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::InvalidPayload` if the value is not an object
    /// of the expected shape.
    pub fn from_value(value: &Value) -> Result<Self, ConduitError> {
        if !value.is_object() {
            return Err(ConduitError::invalid_payload("event must be a JSON object"));
        }
        Self::deserialize(value).map_err(|e| ConduitError::invalid_payload(e.to_string()))
    }

    /// Checks required fields and fills defaults. `now` supplies the event
    /// time when the request has none.
    pub fn validate(self, now: i64) -> ValidationResult {
        let event_name = match self.event_name.as_deref().map(str::trim) {
            None | Some("") => return ValidationResult::invalid("event_name", "is required"),
            Some(name) if name.chars().count() > MAX_EVENT_NAME_LEN => {
                return ValidationResult::invalid(
                    "event_name",
                    format!("exceeds {MAX_EVENT_NAME_LEN} characters"),
                );
            },
            Some(name) if name.chars().any(char::is_control) => {
                return ValidationResult::invalid("event_name", "contains control characters");
            },
            Some(name) => name.to_string(),
        };

        let event_id = match self.event_id.as_deref().map(str::trim) {
            None => EventId::generate(),
            Some("") => return ValidationResult::invalid("event_id", "must not be blank"),
            Some(id) if id.len() > MAX_EVENT_ID_LEN => {
                return ValidationResult::invalid(
                    "event_id",
                    format!("exceeds {MAX_EVENT_ID_LEN} bytes"),
                );
            },
            Some(id) => EventId::from(id),
        };

        let event_time = match self.event_time {
            None => now,
            Some(time) if time <= 0 => {
                return ValidationResult::invalid("event_time", "must be positive Unix seconds");
            },
            Some(time) => time,
        };

        let event_source_url =
            self.event_source_url.map(|url| url.trim().to_string()).filter(|url| !url.is_empty());

        ValidationResult::Valid(ValidatedEvent {
            event_name,
            event_id,
            event_time,
            event_source_url,
            user_data: self.user_data,
            custom_data: self.custom_data,
        })
    }
}

impl ValidatedEvent {
    /// Canonicalizes the identity fields and builds the stored event.
    pub fn into_event(
        self,
        tenant_key: TenantKey,
        raw_payload: Value,
        source: EventSource,
        received_at: DateTime<Utc>,
    ) -> Event {
        Event {
            tenant_key,
            event_name: self.event_name,
            event_id: self.event_id,
            event_time: self.event_time,
            event_source_url: self.event_source_url,
            user_data: pii::canonicalize(&self.user_data),
            custom_data: self.custom_data,
            raw_payload,
            source,
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const NOW: i64 = 1_700_000_500;

    fn validate(value: Value) -> ValidationResult {
        IngestRequest::from_value(&value).unwrap().validate(NOW)
    }

    #[test]
    fn minimal_request_gets_defaults() {
        let ValidationResult::Valid(event) = validate(json!({"event_name": " PageView "})) else {
            panic!("expected valid");
        };

        assert_eq!(event.event_name, "PageView");
        assert_eq!(event.event_time, NOW);
        assert_eq!(event.event_id.as_str().len(), 36);
    }

    #[test]
    fn supplied_fields_are_kept() {
        let ValidationResult::Valid(event) = validate(json!({
            "event_name": "Lead",
            "event_id": "e1",
            "event_time": 1_700_000_000,
            "event_source_url": "https://example.com/form",
        })) else {
            panic!("expected valid");
        };

        assert_eq!(event.event_id.as_str(), "e1");
        assert_eq!(event.event_time, 1_700_000_000);
        assert_eq!(event.event_source_url.as_deref(), Some("https://example.com/form"));
    }

    #[test]
    fn missing_or_bad_fields_are_invalid() {
        let cases = [
            (json!({}), "event_name"),
            (json!({"event_name": "   "}), "event_name"),
            (json!({"event_name": "x".repeat(101)}), "event_name"),
            (json!({"event_name": "Lead", "event_id": ""}), "event_id"),
            (json!({"event_name": "Lead", "event_time": -5}), "event_time"),
        ];

        for (body, expected) in cases {
            match validate(body.clone()) {
                ValidationResult::Invalid { field, .. } => assert_eq!(field, expected, "{body}"),
                ValidationResult::Valid(_) => panic!("accepted {body}"),
            }
        }
    }

    #[test]
    fn wrong_types_fail_to_parse() {
        assert!(IngestRequest::from_value(&json!({"event_name": "Lead", "event_time": "soon"}))
            .is_err());
        assert!(IngestRequest::from_value(&json!(["Lead"])).is_err());
    }

    #[test]
    fn invalid_result_maps_to_e1001() {
        let error = validate(json!({})).into_result().unwrap_err();
        assert_eq!(error.code(), "E1001");
        assert!(error.to_string().contains("event_name"));
    }

    #[test]
    fn into_event_hashes_identity() {
        let event = validate(json!({
            "event_name": "Lead",
            "event_id": "e1",
            "user_data": {"email": "A@B.com"},
        }))
        .into_result()
        .unwrap()
        .into_event(TenantKey::from("t1"), json!({}), EventSource::Pixel, Utc::now());

        assert_eq!(event.user_data.email, Some(pii::sha256_hex("a@b.com")));
    }
}
