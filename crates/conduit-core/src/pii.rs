//! Normalization and hashing of identity fields.
//!
//! Every identity value leaving the process is a lowercase SHA-256 hex digest
//! of a normalized form. Values that already look like a digest are passed
//! through (lowercased) so canonicalizing twice is a no-op.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::models::UserData;

/// Country code prefixed to phone numbers written without one.
pub const DEFAULT_COUNTRY_CODE: &str = "55";

/// Identity fields subject to hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiField {
    /// Email address.
    Email,
    /// Phone number.
    Phone,
    /// Given name.
    FirstName,
    /// Family name.
    LastName,
    /// City.
    City,
    /// State or region.
    State,
    /// Postal code.
    Zip,
    /// Country.
    Country,
    /// Birth date.
    DateOfBirth,
    /// Caller's own customer id.
    ExternalId,
}

impl PiiField {
    /// All hashed fields.
    pub const ALL: [Self; 10] = [
        Self::Email,
        Self::Phone,
        Self::FirstName,
        Self::LastName,
        Self::City,
        Self::State,
        Self::Zip,
        Self::Country,
        Self::DateOfBirth,
        Self::ExternalId,
    ];

    /// Input keys accepted for this field, in lookup order.
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Email => &["email", "em"],
            Self::Phone => &["phone", "ph"],
            Self::FirstName => &["first_name", "fn"],
            Self::LastName => &["last_name", "ln"],
            Self::City => &["city", "ct"],
            Self::State => &["state", "region", "st"],
            Self::Zip => &["zip", "postal_code", "zp"],
            Self::Country => &["country"],
            Self::DateOfBirth => &["date_of_birth", "db"],
            Self::ExternalId => &["external_id"],
        }
    }

    /// Applies the field's normalization rule.
    pub fn normalize(self, raw: &str) -> String {
        match self {
            Self::Email
            | Self::FirstName
            | Self::LastName
            | Self::City
            | Self::State
            | Self::Country => raw.trim().to_lowercase(),
            Self::Phone => {
                let digits = digits_only(raw);
                if matches!(digits.len(), 10 | 11) {
                    format!("{DEFAULT_COUNTRY_CODE}{digits}")
                } else {
                    digits
                }
            },
            Self::Zip => raw.trim().to_lowercase().chars().filter(|c| !c.is_whitespace()).collect(),
            Self::DateOfBirth => digits_only(raw),
            Self::ExternalId => raw.trim().to_string(),
        }
    }

    fn slot(self, user_data: &mut UserData) -> &mut Option<String> {
        match self {
            Self::Email => &mut user_data.email,
            Self::Phone => &mut user_data.phone,
            Self::FirstName => &mut user_data.first_name,
            Self::LastName => &mut user_data.last_name,
            Self::City => &mut user_data.city,
            Self::State => &mut user_data.state,
            Self::Zip => &mut user_data.zip,
            Self::Country => &mut user_data.country,
            Self::DateOfBirth => &mut user_data.date_of_birth,
            Self::ExternalId => &mut user_data.external_id,
        }
    }
}

/// Returns true for a 64 character hex string.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Lowercase hex SHA-256 of the input.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Hashes one raw value for a field.
///
/// Returns `None` when the value is empty after normalization.
pub fn hash_field(field: PiiField, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if is_sha256_hex(trimmed) {
        return Some(trimmed.to_ascii_lowercase());
    }

    let normalized = field.normalize(raw);
    if normalized.is_empty() {
        None
    } else {
        Some(sha256_hex(&normalized))
    }
}

/// Canonicalizes a raw identity map into hashed [`UserData`].
///
/// Accepts long and short key names. A value may be a string, a number, or a
/// list whose first non-empty element is used. Unknown keys are ignored.
pub fn canonicalize(raw: &Map<String, Value>) -> UserData {
    let mut user_data = UserData::default();

    for field in PiiField::ALL {
        let value = field.aliases().iter().find_map(|alias| raw.get(*alias).and_then(first_text));
        *field.slot(&mut user_data) = value.and_then(|v| hash_field(field, &v));
    }

    user_data.client_ip_address = passthrough(raw, "client_ip_address");
    user_data.client_user_agent = passthrough(raw, "client_user_agent");
    user_data.fbp = passthrough(raw, "fbp");
    user_data.fbc = passthrough(raw, "fbc");

    user_data
}

fn passthrough(raw: &Map<String, Value>, key: &str) -> Option<String> {
    raw.get(key).and_then(first_text).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}
