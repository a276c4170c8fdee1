//! Purchase payload mapping for supported e-commerce platforms.
//!
//! Each platform posts orders in its own shape. Mapping extracts the order
//! id, totals, line items and buyer identity into a [`PurchaseOrder`], which
//! then becomes a `Purchase` event keyed by `order-{order_id}` so retries of
//! the same order webhook collapse into one relay.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use conduit_core::{pii, ConduitError, Event, EventId, EventSource, TenantKey};
use serde_json::{Map, Value};

/// Event name for mapped orders.
pub const PURCHASE_EVENT: &str = "Purchase";

/// Order webhook sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Platform {
    /// Shopify `orders/create` and `orders/paid` payloads.
    Shopify,
    /// WooCommerce order payloads.
    WooCommerce,
    /// Flat payload with conventional field names.
    #[default]
    Generic,
}

impl FromStr for Platform {
    type Err = ConduitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shopify" => Ok(Self::Shopify),
            "woocommerce" | "woo" => Ok(Self::WooCommerce),
            "generic" | "" => Ok(Self::Generic),
            other => Err(ConduitError::invalid_payload(format!("unsupported platform: {other}"))),
        }
    }
}

/// Platform-neutral order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurchaseOrder {
    /// Platform order id.
    pub order_id: String,
    /// Order total.
    pub value: Option<f64>,
    /// ISO 4217 currency.
    pub currency: Option<String>,
    /// Order creation time in Unix seconds.
    pub created_at: Option<i64>,
    /// Raw buyer identity, keyed by canonicalizer field names.
    pub identity: Map<String, Value>,
    /// Product ids from line items.
    pub content_ids: Vec<String>,
    /// Total quantity across line items.
    pub num_items: Option<u64>,
    /// Order page URL.
    pub event_source_url: Option<String>,
}

impl Platform {
    /// Maps a platform payload to an order.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::InvalidPayload` when no order id can be found.
    pub fn map(self, payload: &Map<String, Value>) -> Result<PurchaseOrder, ConduitError> {
        let order = match self {
            Self::Shopify => map_shopify(payload),
            Self::WooCommerce => map_woocommerce(payload),
            Self::Generic => map_generic(payload),
        };

        if order.order_id.is_empty() {
            return Err(ConduitError::invalid_payload("order id is required"));
        }
        Ok(order)
    }
}

impl PurchaseOrder {
    /// Builds the `Purchase` event for this order.
    pub fn into_event(
        self,
        tenant_key: TenantKey,
        raw_payload: Value,
        received_at: DateTime<Utc>,
    ) -> Event {
        let mut custom_data = Map::new();
        custom_data.insert("order_id".into(), Value::String(self.order_id.clone()));
        custom_data.insert("content_type".into(), Value::String("product".into()));
        if let Some(value) = self.value {
            custom_data.insert("value".into(), Value::from(value));
        }
        if let Some(currency) = self.currency {
            custom_data.insert("currency".into(), Value::String(currency));
        }
        if !self.content_ids.is_empty() {
            custom_data.insert("content_ids".into(), Value::from(self.content_ids));
        }
        if let Some(num_items) = self.num_items {
            custom_data.insert("num_items".into(), Value::from(num_items));
        }

        Event {
            tenant_key,
            event_name: PURCHASE_EVENT.to_string(),
            event_id: EventId::from(format!("order-{}", self.order_id)),
            event_time: self.created_at.unwrap_or_else(|| received_at.timestamp()),
            event_source_url: self.event_source_url,
            user_data: pii::canonicalize(&self.identity),
            custom_data,
            raw_payload,
            source: EventSource::Webhook,
            received_at,
        }
    }
}

fn map_shopify(payload: &Map<String, Value>) -> PurchaseOrder {
    let customer = object(payload, "customer");
    let billing =
        object(payload, "billing_address").or_else(|| object(payload, "shipping_address"));
    let client = object(payload, "client_details");

    let from_customer = |key: &str| customer.and_then(|c| text(c, key));
    let from_billing = |key: &str| billing.and_then(|b| text(b, key));

    let mut identity = Map::new();
    put(&mut identity, "email", text(payload, "email").or_else(|| from_customer("email")));
    put(
        &mut identity,
        "phone",
        text(payload, "phone").or_else(|| from_customer("phone")).or_else(|| from_billing("phone")),
    );
    for name in ["first_name", "last_name"] {
        put(&mut identity, name, from_customer(name).or_else(|| from_billing(name)));
    }
    put(&mut identity, "city", from_billing("city"));
    put(&mut identity, "state", from_billing("province_code").or_else(|| from_billing("province")));
    put(&mut identity, "zip", from_billing("zip"));
    put(&mut identity, "country", from_billing("country_code").or_else(|| from_billing("country")));
    put(&mut identity, "external_id", from_customer("id"));
    put(
        &mut identity,
        "client_ip_address",
        text(payload, "browser_ip").or_else(|| client.and_then(|c| text(c, "browser_ip"))),
    );
    put(&mut identity, "client_user_agent", client.and_then(|c| text(c, "user_agent")));

    let (content_ids, num_items) = line_items(payload, &["product_id", "sku"]);

    PurchaseOrder {
        order_id: text(payload, "id").unwrap_or_default(),
        value: number(payload, "total_price").or_else(|| number(payload, "current_total_price")),
        currency: text(payload, "currency").map(|c| c.to_uppercase()),
        created_at: payload.get("created_at").and_then(timestamp),
        identity,
        content_ids,
        num_items,
        event_source_url: text(payload, "order_status_url"),
    }
}

fn map_woocommerce(payload: &Map<String, Value>) -> PurchaseOrder {
    let billing = object(payload, "billing");

    let mut identity = Map::new();
    if let Some(billing) = billing {
        for (field, key) in [
            ("email", "email"),
            ("phone", "phone"),
            ("first_name", "first_name"),
            ("last_name", "last_name"),
            ("city", "city"),
            ("state", "state"),
            ("zip", "postcode"),
            ("country", "country"),
        ] {
            put(&mut identity, field, text(billing, key));
        }
    }
    put(&mut identity, "external_id", text(payload, "customer_id").filter(|id| id != "0"));
    put(&mut identity, "client_ip_address", text(payload, "customer_ip_address"));
    put(&mut identity, "client_user_agent", text(payload, "customer_user_agent"));

    let (content_ids, num_items) = line_items(payload, &["product_id", "sku"]);

    PurchaseOrder {
        order_id: text(payload, "id").or_else(|| text(payload, "number")).unwrap_or_default(),
        value: number(payload, "total"),
        currency: text(payload, "currency").map(|c| c.to_uppercase()),
        created_at: payload
            .get("date_created_gmt")
            .or_else(|| payload.get("date_created"))
            .and_then(timestamp),
        identity,
        content_ids,
        num_items,
        event_source_url: None,
    }
}

fn map_generic(payload: &Map<String, Value>) -> PurchaseOrder {
    let mut identity = object(payload, "user_data").cloned().unwrap_or_default();
    for field in [
        "email",
        "phone",
        "first_name",
        "last_name",
        "city",
        "state",
        "zip",
        "country",
        "external_id",
        "client_ip_address",
        "client_user_agent",
        "fbp",
        "fbc",
    ] {
        if !identity.contains_key(field) {
            put(&mut identity, field, text(payload, field));
        }
    }

    let content_ids = match payload.get("content_ids") {
        Some(Value::Array(ids)) => ids.iter().filter_map(value_text).collect(),
        Some(other) => value_text(other).into_iter().collect(),
        None => line_items(payload, &["product_id", "sku", "id"]).0,
    };

    PurchaseOrder {
        order_id: text(payload, "order_id").or_else(|| text(payload, "id")).unwrap_or_default(),
        value: number(payload, "value").or_else(|| number(payload, "total")),
        currency: text(payload, "currency").map(|c| c.to_uppercase()),
        created_at: payload
            .get("created_at")
            .or_else(|| payload.get("event_time"))
            .and_then(timestamp),
        identity,
        content_ids,
        num_items: payload.get("num_items").and_then(count),
        event_source_url: text(payload, "event_source_url"),
    }
}

fn object<'a>(payload: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    payload.get(key).and_then(Value::as_object)
}

fn text(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(value_text)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(payload: &Map<String, Value>, key: &str) -> Option<f64> {
    match payload.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn put(identity: &mut Map<String, Value>, field: &str, value: Option<String>) {
    if let Some(value) = value {
        identity.insert(field.to_string(), Value::String(value));
    }
}

/// Product ids (first key found per item) and summed quantity.
fn line_items(payload: &Map<String, Value>, id_keys: &[&str]) -> (Vec<String>, Option<u64>) {
    let Some(items) = payload.get("line_items").and_then(Value::as_array) else {
        return (Vec::new(), None);
    };

    let mut ids = Vec::new();
    let mut quantity = 0u64;
    for item in items.iter().filter_map(Value::as_object) {
        if let Some(id) = id_keys.iter().find_map(|key| text(item, key)) {
            ids.push(id);
        }
        quantity = quantity.saturating_add(item.get("quantity").and_then(count).unwrap_or(1));
    }

    (ids, (!items.is_empty()).then_some(quantity))
}

/// Unix seconds from a number, RFC 3339 string or naive UTC datetime.
fn timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().filter(|t| *t > 0),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(seconds) = s.parse::<i64>() {
                return (seconds > 0).then_some(seconds);
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.timestamp());
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc().timestamp())
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(platform: Platform, payload: Value) -> Result<PurchaseOrder, ConduitError> {
        platform.map(payload.as_object().unwrap())
    }

    #[test]
    fn platform_names() {
        assert_eq!("Shopify".parse::<Platform>().unwrap(), Platform::Shopify);
        assert_eq!("woo".parse::<Platform>().unwrap(), Platform::WooCommerce);
        assert_eq!("generic".parse::<Platform>().unwrap(), Platform::Generic);
        assert!("magento".parse::<Platform>().is_err());
    }

    #[test]
    fn shopify_order() {
        let order = map(
            Platform::Shopify,
            json!({
                "id": 820982911946154508u64,
                "email": "Jon@Example.com",
                "created_at": "2024-03-01T12:00:00-03:00",
                "total_price": "199.00",
                "currency": "brl",
                "customer": {"id": 115310627314723954u64, "first_name": "Jon", "last_name": "Snow"},
                "billing_address": {"city": "São Paulo", "province_code": "SP", "zip": "01310-100", "country_code": "BR"},
                "line_items": [
                    {"product_id": 632910392, "quantity": 2},
                    {"product_id": 632910393, "quantity": 1}
                ],
                "browser_ip": "203.0.113.7"
            }),
        )
        .unwrap();

        assert_eq!(order.order_id, "820982911946154508");
        assert_eq!(order.value, Some(199.0));
        assert_eq!(order.currency.as_deref(), Some("BRL"));
        assert_eq!(order.created_at, Some(1_709_305_200));
        assert_eq!(order.content_ids, vec!["632910392", "632910393"]);
        assert_eq!(order.num_items, Some(3));
        assert_eq!(order.identity["state"], "SP");
        assert_eq!(order.identity["external_id"], "115310627314723954");
        assert_eq!(order.identity["client_ip_address"], "203.0.113.7");
    }

    #[test]
    fn woocommerce_order() {
        let order = map(
            Platform::WooCommerce,
            json!({
                "id": 727,
                "total": "29.35",
                "currency": "USD",
                "date_created_gmt": "2024-03-01T15:00:00",
                "customer_id": 0,
                "billing": {"email": "john.doe@example.com", "phone": "(555) 555-5555", "postcode": "94103"},
                "line_items": [{"product_id": 93, "quantity": 2, "sku": ""}]
            }),
        )
        .unwrap();

        assert_eq!(order.order_id, "727");
        assert_eq!(order.value, Some(29.35));
        assert_eq!(order.created_at, Some(1_709_305_200));
        assert_eq!(order.identity["zip"], "94103");
        assert!(!order.identity.contains_key("external_id"));
        assert_eq!(order.num_items, Some(2));
    }

    #[test]
    fn generic_order_accepts_flat_fields() {
        let order = map(
            Platform::Generic,
            json!({"order_id": "A-1", "value": 10, "email": "a@b.com", "content_ids": ["x", 7]}),
        )
        .unwrap();

        assert_eq!(order.order_id, "A-1");
        assert_eq!(order.content_ids, vec!["x", "7"]);
        assert_eq!(order.identity["email"], "a@b.com");
    }

    #[test]
    fn huge_quantities_saturate() {
        let order = map(
            Platform::Generic,
            json!({
                "order_id": "Q-1",
                "line_items": [{"quantity": u64::MAX}, {"quantity": 1}, {"quantity": "7"}]
            }),
        )
        .unwrap();

        assert_eq!(order.num_items, Some(u64::MAX));
    }

    #[test]
    fn missing_order_id_is_invalid() {
        for platform in [Platform::Shopify, Platform::WooCommerce, Platform::Generic] {
            let error = map(platform, json!({"total": "1.00", "email": "a@b.com"})).unwrap_err();
            assert_eq!(error.code(), "E1001");
        }
    }

    #[test]
    fn order_becomes_purchase_event() {
        let received_at = DateTime::from_timestamp(1_710_000_000, 0).unwrap();
        let order = map(Platform::Generic, json!({"order_id": 1001, "email": "A@B.com"})).unwrap();
        let event = order.into_event(TenantKey::from("t1"), json!({}), received_at);

        assert_eq!(event.event_name, "Purchase");
        assert_eq!(event.event_id.as_str(), "order-1001");
        assert_eq!(event.event_time, 1_710_000_000);
        assert_eq!(event.user_data.email, Some(pii::sha256_hex("a@b.com")));
        assert_eq!(event.custom_data["order_id"], "1001");
        assert_eq!(event.source, EventSource::Webhook);
    }
}
