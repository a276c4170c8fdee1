//! Mapping from [`Event`] to the conversions API request schema.

use conduit_core::{Event, TenantCredential, UserData};
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// Action source used when the event does not override it.
pub const DEFAULT_ACTION_SOURCE: &str = "website";

/// Request body for `POST /{version}/{pixel_id}/events`.
#[derive(Clone, Serialize)]
pub struct CapiRequest {
    /// Events in this request.
    pub data: Vec<ServerEvent>,
    /// Tenant access token.
    pub access_token: String,
    /// Routes the events to the test tool when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_event_code: Option<String>,
}

impl CapiRequest {
    /// Builds a single-event request for the given tenant.
    pub fn single(event: ServerEvent, credential: &TenantCredential) -> Self {
        Self {
            data: vec![event],
            access_token: credential.access_token.clone(),
            test_event_code: credential.test_event_code.clone(),
        }
    }
}

/// One event in the downstream schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    /// Event name.
    pub event_name: String,
    /// Unix seconds.
    pub event_time: i64,
    /// Downstream deduplication key; identical across retries.
    pub event_id: String,
    /// Where the conversion happened.
    pub action_source: String,
    /// Page URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_source_url: Option<String>,
    /// Hashed identity and client context.
    pub user_data: CapiUserData,
    /// Custom parameters.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub custom_data: Map<String, Value>,
}

/// User data with downstream short keys; hashed fields are arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapiUserData {
    #[serde(skip_serializing_if = "Option::is_none")]
    em: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ph: Option<Vec<String>>,
    #[serde(rename = "fn", skip_serializing_if = "Option::is_none")]
    first_name: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ln: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ct: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    st: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    zp: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fbp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fbc: Option<String>,
}

impl From<&UserData> for CapiUserData {
    fn from(user_data: &UserData) -> Self {
        let one = |v: &Option<String>| v.clone().map(|hash| vec![hash]);

        Self {
            em: one(&user_data.email),
            ph: one(&user_data.phone),
            first_name: one(&user_data.first_name),
            ln: one(&user_data.last_name),
            ct: one(&user_data.city),
            st: one(&user_data.state),
            zp: one(&user_data.zip),
            country: one(&user_data.country),
            db: one(&user_data.date_of_birth),
            external_id: one(&user_data.external_id),
            client_ip_address: user_data.client_ip_address.clone(),
            client_user_agent: user_data.client_user_agent.clone(),
            fbp: user_data.fbp.clone(),
            fbc: user_data.fbc.clone(),
        }
    }
}

/// Maps a stored event to the downstream schema.
pub fn server_event(event: &Event) -> ServerEvent {
    let mut custom_data = event.custom_data.clone();

    let action_source = match custom_data.remove("action_source") {
        Some(Value::String(source)) if !source.trim().is_empty() => source.trim().to_string(),
        _ => DEFAULT_ACTION_SOURCE.to_string(),
    };

    normalize_custom_data(&mut custom_data);

    ServerEvent {
        event_name: event.event_name.clone(),
        event_time: event.event_time,
        event_id: event.event_id.to_string(),
        action_source,
        event_source_url: event.event_source_url.clone(),
        user_data: CapiUserData::from(&event.user_data),
        custom_data,
    }
}

/// Coerces well-known custom data keys to the types the downstream expects.
///
/// Values that cannot be coerced are dropped rather than forwarded in a shape
/// that would get the whole event rejected.
fn normalize_custom_data(custom_data: &mut Map<String, Value>) {
    if let Some(value) = custom_data.remove("value") {
        if let Some(number) = as_number(&value) {
            custom_data.insert("value".into(), Value::Number(number));
        }
    }

    if let Some(Value::String(currency)) = custom_data.remove("currency") {
        let currency = currency.trim().to_uppercase();
        if !currency.is_empty() {
            custom_data.insert("currency".into(), Value::String(currency));
        }
    }

    if let Some(ids) = custom_data.remove("content_ids") {
        let ids: Vec<Value> = match ids {
            Value::Array(items) => items.iter().filter_map(as_id).collect(),
            other => as_id(&other).into_iter().collect(),
        };
        if !ids.is_empty() {
            custom_data.insert("content_ids".into(), Value::Array(ids));
        }
    }

    if let Some(order_id) = custom_data.remove("order_id") {
        if let Some(id) = as_id(&order_id) {
            custom_data.insert("order_id".into(), id);
        }
    }

    if let Some(num_items) = custom_data.remove("num_items") {
        let count = match &num_items {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        if let Some(count) = count {
            custom_data.insert("num_items".into(), Value::from(count));
        }
    }
}

fn as_number(value: &Value) -> Option<Number> {
    match value {
        Value::Number(n) => Some(n.clone()),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(Number::from_f64),
        _ => None,
    }
}

fn as_id(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(Value::String(s.trim().to_string())),
        Value::Number(n) => Some(Value::String(n.to_string())),
        _ => None,
    }
}
