//! Subscription state storage
//!
//! `seller_subscriptions` is the source of truth; the profile projection
//! columns are a read cache rebuilt by the projector. Both adapters implement
//! the upsert as a single atomic step keyed by `(seller_id, provider)`, with
//! `updated_at = GREATEST(previous, new)`.

mod memory;
mod postgres;

pub use memory::InMemoryBillingStore;
pub use postgres::PgBillingStore;

use async_trait::async_trait;
use bazaar_shared::{PlanId, Provider, SellerId, SubscriptionStatus};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::normalize::NormalizedEvent;
use crate::projection::ProfileProjection;

/// One provider's subscription for one seller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SellerSubscription {
    pub seller_id: SellerId,
    pub provider: Provider,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub external_customer_ref: String,
    pub external_subscription_ref: Option<String>,
    pub original_customer_ref: Option<String>,
    pub price_ref: Option<String>,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub updated_at: OffsetDateTime,
}

impl SellerSubscription {
    /// Full-state row for an event; anything the event lacks is written as null
    pub fn from_event(seller_id: SellerId, event: &NormalizedEvent) -> Self {
        Self {
            seller_id,
            provider: event.provider,
            plan_id: event.plan_id.unwrap_or_default(),
            status: event.status,
            external_customer_ref: event.external_customer_ref.clone(),
            external_subscription_ref: event.external_subscription_ref.clone(),
            original_customer_ref: event.original_customer_ref.clone(),
            price_ref: event.price_ref.clone(),
            period_start: event.period_start,
            period_end: event.period_end,
            trial_end: event.trial_end,
            cancel_at_period_end: event.cancel_at_period_end,
            updated_at: event.effective_at(),
        }
    }
}

/// Persistence port for the reconciliation core
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Seller whose profile carries this Stripe customer id
    async fn find_seller_by_stripe_customer(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<SellerId>>;

    /// Seller whose profile carries this RevenueCat app user id
    async fn find_seller_by_rc_app_user(&self, app_user_id: &str)
        -> BillingResult<Option<SellerId>>;

    /// Insert or overwrite the row for `(seller_id, provider)` and return it as stored
    async fn upsert_subscription(
        &self,
        subscription: &SellerSubscription,
    ) -> BillingResult<SellerSubscription>;

    async fn list_subscriptions(&self, seller_id: SellerId)
        -> BillingResult<Vec<SellerSubscription>>;

    /// Overwrite the seller profile's projection columns
    async fn write_projection(
        &self,
        seller_id: SellerId,
        projection: &ProfileProjection,
    ) -> BillingResult<()>;

    async fn read_projection(&self, seller_id: SellerId)
        -> BillingResult<Option<ProfileProjection>>;

    /// Every seller that has at least one subscription row
    async fn list_seller_ids(&self) -> BillingResult<Vec<SellerId>>;

    /// Connectivity check for health probes
    async fn ping(&self) -> BillingResult<()>;
}
