//! Billing configuration and Stripe client
//!
//! Everything provider-specific that used to live in process-wide globals is
//! gathered into [`BillingConfig`], built once at startup and never mutated.

use stripe::Client;

use crate::catalog::PlanCatalog;
use crate::error::{BillingError, BillingResult};

/// Default tolerance for the `t=` timestamp in `Stripe-Signature`
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret (`whsec_...`)
    pub webhook_secret: String,
    /// Maximum age of a signed webhook, in seconds
    pub signature_tolerance_secs: i64,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            signature_tolerance_secs: std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SIGNATURE_TOLERANCE_SECS),
        })
    }
}

/// Configuration for RevenueCat webhooks
#[derive(Debug, Clone)]
pub struct RevenueCatConfig {
    /// Shared secret RevenueCat sends in the authorization header
    pub webhook_secret: String,
}

impl RevenueCatConfig {
    pub fn from_env() -> BillingResult<Self> {
        let webhook_secret = std::env::var("REVENUECAT_WEBHOOK_SECRET").map_err(|_| {
            BillingError::Config("REVENUECAT_WEBHOOK_SECRET not set".to_string())
        })?;
        Ok(Self { webhook_secret })
    }
}

/// Immutable billing configuration shared by normalizers, resolver and engine
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub stripe: StripeConfig,
    pub revenuecat: RevenueCatConfig,
    pub catalog: PlanCatalog,
}

impl BillingConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            stripe: StripeConfig::from_env()?,
            revenuecat: RevenueCatConfig::from_env()?,
            catalog: PlanCatalog::from_env()?,
        })
    }
}

/// Stripe API client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Client::new(config.secret_key.clone()),
        }
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }
}
