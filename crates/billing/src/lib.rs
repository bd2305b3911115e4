// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Bazaar Billing Module
//!
//! Reconciles seller subscription state from two billing providers.
//!
//! ## Flow
//!
//! - **Authentication**: Stripe signature or RevenueCat shared secret, checked
//!   before the body is parsed
//! - **Normalization**: provider payload → [`NormalizedEvent`]
//! - **Identity**: provider customer handle → seller
//! - **Reconciliation**: upsert of the `(seller, provider)` row
//! - **Projection**: winning row cached on the seller profile
//!
//! The plan catalog also backs the price endpoints of the pricing page.

pub mod catalog;
pub mod client;
pub mod error;
pub mod identity;
pub mod normalize;
pub mod prices;
pub mod projection;
pub mod reconcile;
pub mod signature;
pub mod store;

// Catalog
pub use catalog::PlanCatalog;

// Client
pub use client::{BillingConfig, RevenueCatConfig, StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Identity
pub use identity::IdentityResolver;

// Normalize
pub use normalize::{EventKind, Normalized, NormalizedEvent};

// Prices
pub use prices::{fetch_plan_prices, PlanPrices, PriceInfo, PriceLookup, StripePriceLookup};

// Projection
pub use projection::{select_winner, ProfileProjection, ResyncReport, StateProjector};

// Reconcile
pub use reconcile::{ReconcileOutcome, ReconciliationEngine};

// Store
pub use store::{BillingStore, InMemoryBillingStore, PgBillingStore, SellerSubscription};

use std::sync::Arc;

use bazaar_shared::{BillingTerm, PlanId};
use sqlx::PgPool;
use time::OffsetDateTime;

/// What a webhook delivery amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Authenticated and understood, but carries no state to apply
    Ignored { kind: EventKind, reason: &'static str },
    /// Event normalized and handed to the engine
    Reconciled {
        event: NormalizedEvent,
        outcome: ReconcileOutcome,
    },
}

/// Entry point used by the HTTP layer and tooling
pub struct BillingService {
    config: BillingConfig,
    store: Arc<dyn BillingStore>,
    engine: ReconciliationEngine,
    prices: Arc<dyn PriceLookup>,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = BillingConfig::from_env()?;
        let stripe = StripeClient::new(&config.stripe);

        Ok(Self::new(
            config,
            Arc::new(PgBillingStore::new(pool)),
            Arc::new(StripePriceLookup::new(stripe)),
        ))
    }

    /// Create a new billing service with explicit collaborators
    pub fn new(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        prices: Arc<dyn PriceLookup>,
    ) -> Self {
        Self {
            engine: ReconciliationEngine::new(store.clone()),
            config,
            store,
            prices,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.config.catalog
    }

    /// Verify, normalize and apply a Stripe webhook
    pub async fn handle_stripe_webhook(
        &self,
        payload: &str,
        signature_header: Option<&str>,
    ) -> BillingResult<WebhookOutcome> {
        let header = signature_header.ok_or_else(|| {
            BillingError::Unauthorized("missing Stripe-Signature header".to_string())
        })?;

        signature::verify_stripe_signature(
            payload,
            header,
            &self.config.stripe.webhook_secret,
            self.config.stripe.signature_tolerance_secs,
        )
        .map_err(|e| match e {
            BillingError::Config(msg) => {
                tracing::error!(error = %msg, "Stripe webhook secret misconfigured");
                BillingError::Unauthorized("signature cannot be verified".to_string())
            }
            other => {
                tracing::warn!(error = %other, "Stripe webhook signature verification failed");
                other
            }
        })?;

        let normalized =
            normalize::stripe::normalize(payload, &self.config.catalog, OffsetDateTime::now_utc())?;
        self.apply(normalized).await
    }

    /// Authenticate, normalize and apply a RevenueCat webhook.
    /// `secrets` are the candidate values found in the request's auth headers;
    /// the delivery is authorized when any one of them matches.
    pub async fn handle_revenuecat_webhook(
        &self,
        payload: &str,
        secrets: &[&str],
    ) -> BillingResult<WebhookOutcome> {
        let expected = &self.config.revenuecat.webhook_secret;
        let authorized = secrets
            .iter()
            .any(|secret| signature::verify_shared_secret(Some(secret), expected).is_ok());

        if !authorized {
            tracing::warn!(candidates = secrets.len(), "RevenueCat webhook secret mismatch");
            return Err(BillingError::Unauthorized("Invalid secret".to_string()));
        }

        let normalized = normalize::revenuecat::normalize(payload, OffsetDateTime::now_utc())?;
        self.apply(normalized).await
    }

    async fn apply(&self, normalized: Normalized) -> BillingResult<WebhookOutcome> {
        match normalized {
            Normalized::Ignored { kind, reason } => {
                tracing::info!(event_kind = %kind, reason = reason, "Webhook acknowledged without action");
                Ok(WebhookOutcome::Ignored { kind, reason })
            }
            Normalized::Subscription(event) => {
                let outcome = self.engine.apply(&event).await?;
                Ok(WebhookOutcome::Reconciled { event, outcome })
            }
        }
    }

    /// Resolve a plan/term pair (as received over HTTP) to its Stripe price id
    pub fn price_id(&self, plan: &str, term: &str) -> BillingResult<(PlanId, BillingTerm, String)> {
        let (plan, term, price_id) = self.config.catalog.resolve(plan, term)?;
        Ok((plan, term, price_id.to_string()))
    }

    /// Display prices of every paid plan for a term
    pub async fn plan_prices(&self, term: BillingTerm) -> PlanPrices {
        fetch_plan_prices(&self.config.catalog, self.prices.as_ref(), term).await
    }

    /// Storage connectivity for health checks
    pub async fn ping(&self) -> BillingResult<()> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_shared::{Provider, SellerId, SubscriptionStatus};
    use serde_json::json;

    const STRIPE_SECRET: &str = "whsec_unit";
    const RC_SECRET: &str = "rc_unit_secret";

    struct NoPrices;

    #[async_trait::async_trait]
    impl PriceLookup for NoPrices {
        async fn lookup(&self, _price_id: &str) -> BillingResult<PriceInfo> {
            Err(BillingError::StripeApi("offline".to_string()))
        }
    }

    fn config() -> BillingConfig {
        BillingConfig {
            stripe: StripeConfig {
                secret_key: "sk_test_unit".to_string(),
                webhook_secret: STRIPE_SECRET.to_string(),
                signature_tolerance_secs: client::DEFAULT_SIGNATURE_TOLERANCE_SECS,
            },
            revenuecat: RevenueCatConfig {
                webhook_secret: RC_SECRET.to_string(),
            },
            catalog: PlanCatalog::new([(PlanId::Premium, BillingTerm::Quarterly, "price_premium_q")])
                .unwrap(),
        }
    }

    async fn service() -> (BillingService, Arc<InMemoryBillingStore>, SellerId) {
        let store = Arc::new(InMemoryBillingStore::new());
        let seller = SellerId::new();
        store.link_stripe_customer(seller, "cus_s").await;
        store.link_rc_app_user(seller, "rc_s").await;
        (
            BillingService::new(config(), store.clone(), Arc::new(NoPrices)),
            store,
            seller,
        )
    }

    fn stripe_payload() -> String {
        json!({
            "id": "evt_1",
            "type": "customer.subscription.created",
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_s",
                "status": "active",
                "items": { "data": [ { "price": { "id": "price_premium_q" } } ] }
            } }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_signed_stripe_webhook_applies() {
        let (service, store, seller) = service().await;
        let payload = stripe_payload();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = signature::sign_stripe_payload(STRIPE_SECRET, now, &payload).unwrap();

        let outcome = service
            .handle_stripe_webhook(&payload, Some(&header))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            WebhookOutcome::Reconciled { outcome: ReconcileOutcome::Applied { .. }, .. }
        ));
        let row = store.subscription(seller, Provider::Stripe).await.unwrap();
        assert_eq!(row.plan_id, PlanId::Premium);
    }

    #[tokio::test]
    async fn test_unsigned_webhooks_touch_nothing() {
        let (service, store, _) = service().await;
        let payload = stripe_payload();

        let missing = service.handle_stripe_webhook(&payload, None).await;
        assert!(matches!(missing, Err(BillingError::Unauthorized(_))));

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let forged = signature::sign_stripe_payload("whsec_forged", now, &payload).unwrap();
        let forged = service.handle_stripe_webhook(&payload, Some(&forged)).await;
        assert!(matches!(forged, Err(BillingError::Unauthorized(_))));

        let rc_payload = json!({
            "event": { "app_user_id": "rc_s", "entitlements": { "vip": { "active": true } } }
        })
        .to_string();
        let wrong = service
            .handle_revenuecat_webhook(&rc_payload, &["nope"])
            .await;
        assert!(matches!(wrong, Err(BillingError::Unauthorized(_))));
        let absent = service.handle_revenuecat_webhook(&rc_payload, &[]).await;
        assert!(matches!(absent, Err(BillingError::Unauthorized(_))));

        assert!(store.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_revenuecat_webhook_applies() {
        let (service, store, seller) = service().await;
        let payload = json!({
            "type": "RENEWAL",
            "app_user_id": "rc_s",
            "data": { "entitlements": { "active": { "vip_gold": {} } } }
        })
        .to_string();

        let outcome = service
            .handle_revenuecat_webhook(&payload, &["stale_secret", RC_SECRET])
            .await
            .unwrap();

        let WebhookOutcome::Reconciled { event, .. } = outcome else {
            panic!("expected reconciled outcome");
        };
        assert_eq!(event.plan_id, Some(PlanId::VipGold));
        let projection = store.read_projection(seller).await.unwrap().unwrap();
        assert_eq!(projection.active_plan_id, PlanId::VipGold);
        assert_eq!(projection.subscription_status, Some(SubscriptionStatus::Active));
    }

    #[tokio::test]
    async fn test_price_endpoints() {
        let (service, _, _) = service().await;
        let (plan, term, price) = service.price_id("premium", "quarterly").unwrap();
        assert_eq!(plan, PlanId::Premium);
        assert_eq!(term, BillingTerm::Quarterly);
        assert_eq!(price, "price_premium_q");

        let prices = service.plan_prices(BillingTerm::Quarterly).await;
        assert!(prices.prices.values().all(|p| *p == PriceInfo::default()));
    }
}
