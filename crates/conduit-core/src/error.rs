//! Error types and result handling for the ingestion pipeline.
//!
//! Two layers: `CoreError` covers storage and crypto failures inside this
//! crate, `ConduitError` is the coded taxonomy surfaced on the synchronous
//! request path so clients can tell failure classes apart.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for internal operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Secret could not be encrypted or decrypted.
    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {}", db_err))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {}", db_err))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Coded error taxonomy for the ingestion and relay pipeline.
#[derive(Debug, Error)]
pub enum ConduitError {
    // Client errors (E1001-E1005)
    /// Request body failed validation (E1001).
    #[error("[E1001] Invalid payload: {message}")]
    InvalidPayload {
        /// What was wrong with the payload
        message: String,
    },

    /// No tenant key on the request (E1002).
    #[error("[E1002] Missing tenant: supply X-Tenant-Key header or tenant_key query parameter")]
    MissingTenant,

    /// Body exceeds the configured limit (E1003).
    #[error("[E1003] Payload too large: {size_bytes} bytes exceeds {limit_bytes} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected payload
        size_bytes: usize,
        /// Configured limit
        limit_bytes: usize,
    },

    /// Event was already accepted for this tenant (E1005).
    #[error("[E1005] Duplicate event: {event_id} already processed")]
    DuplicateEvent {
        /// The idempotency key that was seen before
        event_id: String,
    },

    /// Webhook authentication failed (E1101).
    #[error("[E1101] Authentication failed: {reason}")]
    AuthenticationFailed {
        /// Short, non-sensitive reason
        reason: String,
    },

    // Relay errors (E2001-E2002)
    /// Retryable downstream failure (E2001).
    #[error("[E2001] Transient relay error: {message}")]
    TransientRelay {
        /// Failure description
        message: String,
    },

    /// Non-retryable downstream failure (E2002).
    #[error("[E2002] Terminal relay error: {message}")]
    TerminalRelay {
        /// Failure description
        message: String,
    },

    // System errors (E3001)
    /// Durable storage failed (E3001).
    #[error("[E3001] Persistence failure: {0}")]
    Persistence(#[from] CoreError),
}

impl ConduitError {
    /// Creates an invalid payload error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload { message: message.into() }
    }

    /// Creates an authentication error.
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed { reason: reason.into() }
    }

    /// Returns the error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidPayload { .. } => "E1001",
            Self::MissingTenant => "E1002",
            Self::PayloadTooLarge { .. } => "E1003",
            Self::DuplicateEvent { .. } => "E1005",
            Self::AuthenticationFailed { .. } => "E1101",
            Self::TransientRelay { .. } => "E2001",
            Self::TerminalRelay { .. } => "E2002",
            Self::Persistence(_) => "E3001",
        }
    }

    /// Returns whether the caller may retry the same request.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientRelay { .. } | Self::Persistence(_))
    }

    /// Returns whether this error is caused by the request itself.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload { .. }
                | Self::MissingTenant
                | Self::PayloadTooLarge { .. }
                | Self::AuthenticationFailed { .. }
        )
    }
}
