//! Error types for relay attempts.
//!
//! Every failure of an outbound attempt maps to one variant here, and the
//! variant alone decides whether the relay retries, gives up, or disables
//! the tenant.

use std::fmt;

use conduit_core::ConduitError;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Failure of a relay attempt or of relay setup.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// Connection could not be established or was reset.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// Attempt exceeded its timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured per-attempt timeout
        timeout_seconds: u64,
    },

    /// Downstream answered 5xx or a transient API error code.
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
        /// Truncated response body
        body: String,
    },

    /// Downstream asked us to slow down.
    #[error("rate limited: retry after {retry_after_seconds:?}s")]
    RateLimited {
        /// Seconds from the Retry-After header, if any
        retry_after_seconds: Option<u64>,
    },

    /// Access token was rejected; the tenant must re-authenticate.
    #[error("access token rejected: HTTP {status_code}, api code {api_code:?}")]
    InvalidToken {
        /// HTTP status code
        status_code: u16,
        /// Downstream error code, if parsed
        api_code: Option<i64>,
    },

    /// Downstream rejected the payload itself.
    #[error("request rejected: HTTP {status_code}")]
    Rejected {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Truncated response body
        body: String,
    },

    /// Tenant is disabled by the circuit breaker.
    #[error("circuit breaker open for tenant {tenant_key}")]
    CircuitOpen {
        /// Disabled tenant
        tenant_key: String,
    },

    /// Tenant has no enabled integration.
    #[error("no enabled credentials for tenant {tenant_key}")]
    MissingCredentials {
        /// Tenant without credentials
        tenant_key: String,
    },

    /// Stored credentials fail structural checks.
    #[error("invalid credentials for tenant {tenant_key}: {reason}")]
    InvalidCredentials {
        /// Tenant with bad credentials
        tenant_key: String,
        /// Which check failed
        reason: String,
    },

    /// Credential lookup failed.
    #[error("credential store error: {message}")]
    Store {
        /// Store error message
        message: String,
    },

    /// Relay queue is full.
    #[error("relay queue full: capacity {capacity}")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("relay workers did not stop within {timeout_seconds}s")]
    ShutdownTimeout {
        /// Timeout that elapsed
        timeout_seconds: u64,
    },

    /// Unexpected internal error.
    #[error("internal relay error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl RelayError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rejected-request error from an HTTP response.
    pub fn rejected(status_code: u16, body: impl Into<String>) -> Self {
        Self::Rejected { status_code, body: body.into() }
    }

    /// Creates a circuit open error.
    pub fn circuit_open(tenant_key: impl Into<String>) -> Self {
        Self::CircuitOpen { tenant_key: tenant_key.into() }
    }

    /// Creates an invalid credentials error.
    pub fn invalid_credentials(tenant_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCredentials { tenant_key: tenant_key.into(), reason: reason.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Returns true for failures another attempt may fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. } => true,

            Self::InvalidToken { .. }
            | Self::Rejected { .. }
            | Self::CircuitOpen { .. }
            | Self::MissingCredentials { .. }
            | Self::InvalidCredentials { .. }
            | Self::Store { .. }
            | Self::QueueFull { .. }
            | Self::ShutdownTimeout { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Returns true when the tenant's circuit should open.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::InvalidToken { .. })
    }

    /// Seconds the downstream asked us to wait, if it said.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => *retry_after_seconds,
            _ => None,
        }
    }
}

impl From<RelayError> for ConduitError {
    fn from(error: RelayError) -> Self {
        if error.is_retryable() {
            Self::TransientRelay { message: error.to_string() }
        } else {
            Self::TerminalRelay { message: error.to_string() }
        }
    }
}

/// Category of relay error for logs and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connectivity or timeout.
    Network,
    /// 5xx or transient API error.
    Server,
    /// 429.
    RateLimit,
    /// Token rejected.
    Auth,
    /// Payload rejected.
    Client,
    /// Tenant disabled.
    Circuit,
    /// Missing or malformed credentials.
    Configuration,
    /// Queue, shutdown and internal failures.
    Internal,
}

impl From<&RelayError> for ErrorCategory {
    fn from(error: &RelayError) -> Self {
        match error {
            RelayError::Network { .. } | RelayError::Timeout { .. } => Self::Network,
            RelayError::ServerError { .. } => Self::Server,
            RelayError::RateLimited { .. } => Self::RateLimit,
            RelayError::InvalidToken { .. } => Self::Auth,
            RelayError::Rejected { .. } => Self::Client,
            RelayError::CircuitOpen { .. } => Self::Circuit,
            RelayError::MissingCredentials { .. }
            | RelayError::InvalidCredentials { .. }
            | RelayError::Store { .. } => Self::Configuration,
            RelayError::QueueFull { .. }
            | RelayError::ShutdownTimeout { .. }
            | RelayError::Internal { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Auth => write!(f, "auth"),
            Self::Client => write!(f, "client"),
            Self::Circuit => write!(f, "circuit"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
