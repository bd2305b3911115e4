//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    /// Bad or missing webhook signature / shared secret. Nothing was mutated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Payload is malformed or carries values we cannot map. Nothing was mutated.
    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    #[error("No price configured for {plan}:{term}")]
    UnknownTerm { plan: String, term: String },

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    /// The subscription row is durable but the profile projection was not written.
    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// Failures the provider should retry (surfaced as 500)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BillingError::Database(_) | BillingError::Projection(_) | BillingError::StripeApi(_)
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
