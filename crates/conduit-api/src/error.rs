//! HTTP mapping of the coded error taxonomy.
//!
//! Every synchronous failure leaves a handler as `{"error": {"code",
//! "message"}}`. Storage failures are reported without their cause; the
//! cause is logged instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use conduit_core::{ConduitError, CoreError};
use serde::Serialize;
use tracing::{debug, error, warn};

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    /// Error code from the taxonomy (E1001-E3001)
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// Error returned by handlers.
#[derive(Debug)]
pub struct ApiError(pub ConduitError);

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ConduitError::InvalidPayload { .. } | ConduitError::MissingTenant => {
                StatusCode::BAD_REQUEST
            },
            ConduitError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ConduitError::DuplicateEvent { .. } => StatusCode::CONFLICT,
            ConduitError::AuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
            ConduitError::TransientRelay { .. } | ConduitError::TerminalRelay { .. } => {
                StatusCode::BAD_GATEWAY
            },
            ConduitError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match &self.0 {
            ConduitError::Persistence(_) => {
                "[E3001] Persistence failure: event could not be stored, retry later".to_string()
            },
            other => other.to_string(),
        }
    }

    /// Body for the response.
    pub fn to_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail { code: self.0.code().to_string(), message: self.public_message() },
        }
    }
}

impl From<ConduitError> for ApiError {
    fn from(error: ConduitError) -> Self {
        Self(error)
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        Self(ConduitError::Persistence(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.0.code();

        match &self.0 {
            ConduitError::AuthenticationFailed { reason } => {
                warn!(code, reason = %reason, "request rejected");
            },
            ConduitError::Persistence(cause) => {
                error!(code, error = %cause, "request failed");
            },
            other => {
                debug!(code, error = %other, "request rejected");
            },
        }

        (status, Json(self.to_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        let cases = [
            (ConduitError::invalid_payload("x"), StatusCode::BAD_REQUEST),
            (ConduitError::MissingTenant, StatusCode::BAD_REQUEST),
            (
                ConduitError::PayloadTooLarge { size_bytes: 2, limit_bytes: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (ConduitError::auth("bad signature"), StatusCode::UNAUTHORIZED),
            (
                ConduitError::Persistence(CoreError::Database("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError(error).status(), status);
        }
    }

    #[test]
    fn persistence_cause_is_not_exposed() {
        let error = ApiError::from(CoreError::Database(
            "connection to 10.0.0.5:5432 refused for user conduit".into(),
        ));
        let body = serde_json::to_value(error.to_body()).unwrap();

        assert_eq!(body["error"]["code"], "E3001");
        assert!(!body["error"]["message"].as_str().unwrap().contains("10.0.0.5"));
    }
}
