//! API error types and handling

use axum::{
    extract::rejection::{BytesRejection, StringRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bazaar_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("{0}")]
    Unauthorized(String),
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("Method not allowed")]
    MethodNotAllowed,

    // Resource errors
    #[error("{0}")]
    NotFound(String),

    // Internal errors
    #[error("Internal server error")]
    Internal,
    #[error("Request timed out")]
    Timeout,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::InvalidSignature(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", self.to_string()),

            // Validation
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", self.to_string()),
            ApiError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", self.to_string()),

            // Resources
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),

            // Internal: never leak details, the provider only needs to retry
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::Timeout => (StatusCode::INTERNAL_SERVER_ERROR, "TIMEOUT", self.to_string()),
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            BillingError::Normalization(msg) => ApiError::BadRequest(msg),
            BillingError::UnknownPlan(_) | BillingError::UnknownTerm { .. } => {
                ApiError::NotFound(err.to_string())
            }
            BillingError::Database(_)
            | BillingError::Projection(_)
            | BillingError::StripeApi(_)
            | BillingError::Config(_) => {
                tracing::error!(error = %err, transient = err.is_transient(), "Billing error");
                ApiError::Internal
            }
        }
    }
}

impl ApiError {
    /// Body extraction failures keep their status class but speak JSON
    fn from_rejection(status: StatusCode, message: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::BadRequest(message)
        }
    }
}

impl From<StringRejection> for ApiError {
    fn from(rejection: StringRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
