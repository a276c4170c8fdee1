//! Webhook authentication.
//!
//! Senders that can sign requests use HMAC mode: `X-Webhook-Timestamp` and
//! `X-Webhook-Signature` over `"{timestamp}.{raw_body}"` with the tenant's
//! webhook secret. Senders that cannot sign pass the secret as a `token`
//! query parameter. The mode is resolved once per request into
//! [`WebhookAuth`]; presence of either HMAC header selects HMAC mode even if
//! a token is also supplied.

use std::time::Duration;

use axum::http::HeaderMap;
use conduit_core::ConduitError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signing timestamp (Unix seconds).
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Header carrying the hex HMAC-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Authentication material supplied with a webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAuth {
    /// Static shared token.
    Token(String),
    /// Signed request.
    Hmac {
        /// Timestamp header as sent.
        timestamp: String,
        /// Signature header as sent.
        signature: String,
    },
}

/// Reasons a webhook request fails authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Neither HMAC headers nor a token were supplied.
    #[error("missing webhook credentials")]
    MissingCredentials,

    /// Only one of the two HMAC headers was supplied.
    #[error("both X-Webhook-Timestamp and X-Webhook-Signature are required")]
    IncompleteHmacHeaders,

    /// The tenant has no webhook secret configured.
    #[error("webhook authentication is not configured for this tenant")]
    SecretNotConfigured,

    /// Timestamp is not an integer.
    #[error("malformed timestamp")]
    MalformedTimestamp,

    /// Timestamp is too far from server time.
    #[error("timestamp outside tolerance ({skew_seconds}s skew)")]
    TimestampOutsideTolerance {
        /// Absolute difference from server time
        skew_seconds: u64,
    },

    /// Signature is not hex.
    #[error("malformed signature")]
    MalformedSignature,

    /// Signature does not match the body.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// Token does not match the secret.
    #[error("invalid token")]
    TokenMismatch,

    /// Secret cannot be used as an HMAC key.
    #[error("invalid webhook secret")]
    InvalidSecret,
}

impl From<SignatureError> for ConduitError {
    fn from(error: SignatureError) -> Self {
        Self::auth(error.to_string())
    }
}

impl WebhookAuth {
    /// Resolves the authentication mode from the request.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::IncompleteHmacHeaders` if only one HMAC
    /// header is present and `SignatureError::MissingCredentials` if nothing
    /// usable was supplied.
    pub fn from_request(headers: &HeaderMap, token: Option<&str>) -> Result<Self, SignatureError> {
        let header = |name: &str| {
            headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).map(str::to_string)
        };

        match (header(TIMESTAMP_HEADER), header(SIGNATURE_HEADER)) {
            (Some(timestamp), Some(signature)) => {
                return Ok(Self::Hmac { timestamp, signature });
            },
            (Some(_), None) | (None, Some(_)) => return Err(SignatureError::IncompleteHmacHeaders),
            (None, None) => {},
        }

        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => Ok(Self::Token(token.to_string())),
            None => Err(SignatureError::MissingCredentials),
        }
    }

    /// Short mode name for logs.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::Hmac { .. } => "hmac",
        }
    }

    /// Verifies the request against the tenant's secret.
    ///
    /// In HMAC mode the timestamp is checked first, so a stale request is
    /// rejected whether or not its signature is correct. A skew of exactly
    /// `tolerance` is accepted.
    ///
    /// # Errors
    ///
    /// Returns the specific [`SignatureError`] on rejection.
    pub fn verify(
        &self,
        secret: &str,
        body: &[u8],
        now_unix: i64,
        tolerance: Duration,
    ) -> Result<(), SignatureError> {
        if secret.is_empty() {
            return Err(SignatureError::SecretNotConfigured);
        }

        match self {
            Self::Token(token) => {
                if timing_safe_eq(token.as_bytes(), secret.as_bytes()) {
                    Ok(())
                } else {
                    Err(SignatureError::TokenMismatch)
                }
            },
            Self::Hmac { timestamp, signature } => {
                let ts: i64 = timestamp.parse().map_err(|_| SignatureError::MalformedTimestamp)?;
                let skew_seconds = now_unix.abs_diff(ts);
                if skew_seconds > tolerance.as_secs() {
                    return Err(SignatureError::TimestampOutsideTolerance { skew_seconds });
                }

                let hex_signature = signature.strip_prefix("sha256=").unwrap_or(signature);
                let supplied =
                    hex::decode(hex_signature).map_err(|_| SignatureError::MalformedSignature)?;

                signing_mac(secret, timestamp, body)?
                    .verify_slice(&supplied)
                    .map_err(|_| SignatureError::SignatureMismatch)
            },
        }
    }
}

/// Computes the hex signature a sender attaches for `timestamp` and `body`.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the secret is rejected as a
/// key.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mac = signing_mac(secret, timestamp, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn signing_mac(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Constant-time comparison for equal-length inputs.
fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (a_byte, b_byte) in a.iter().zip(b.iter()) {
        result |= a_byte ^ b_byte;
    }

    result == 0
}
