//! Reconciliation Engine
//!
//! Applies one canonical event: resolve the seller, upsert the
//! `(seller, provider)` row as a full snapshot, then re-project the profile.
//! Ordering is last-write-wins; a late stale event can overwrite fresher
//! provider state until the next delivery corrects it.

use std::sync::Arc;

use bazaar_shared::{Provider, SellerId};

use crate::error::{BillingError, BillingResult};
use crate::identity::IdentityResolver;
use crate::normalize::NormalizedEvent;
use crate::projection::{ProfileProjection, StateProjector};
use crate::store::{BillingStore, SellerSubscription};

/// What applying an event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Row written and projection refreshed
    Applied {
        seller_id: SellerId,
        subscription: SellerSubscription,
        projection: ProfileProjection,
    },
    /// No seller is linked to the provider handle; nothing was written
    Unroutable {
        provider: Provider,
        external_customer_ref: String,
    },
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn BillingStore>,
    resolver: IdentityResolver,
    projector: StateProjector,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self {
            resolver: IdentityResolver::new(store.clone()),
            projector: StateProjector::new(store.clone()),
            store,
        }
    }

    pub fn projector(&self) -> &StateProjector {
        &self.projector
    }

    pub async fn apply(&self, event: &NormalizedEvent) -> BillingResult<ReconcileOutcome> {
        let Some(seller_id) = self.resolver.resolve(event).await? else {
            tracing::warn!(
                provider = %event.provider,
                external_customer_ref = %event.external_customer_ref,
                event_kind = %event.event_kind,
                "No seller linked to provider customer; event not applied"
            );
            return Ok(ReconcileOutcome::Unroutable {
                provider: event.provider,
                external_customer_ref: event.external_customer_ref.clone(),
            });
        };

        let row = SellerSubscription::from_event(seller_id, event);
        let subscription = self.store.upsert_subscription(&row).await.map_err(|e| {
            tracing::error!(
                seller_id = %seller_id,
                provider = %event.provider,
                error = %e,
                "Failed to upsert seller subscription"
            );
            e
        })?;

        tracing::info!(
            seller_id = %seller_id,
            provider = %subscription.provider,
            plan = %subscription.plan_id,
            status = %subscription.status,
            event_kind = %event.event_kind,
            "Seller subscription reconciled"
        );

        // The row stays written even if the cache update fails
        let projection = self.projector.project(seller_id).await.map_err(|e| {
            tracing::error!(
                seller_id = %seller_id,
                error = %e,
                "Subscription stored but profile projection failed"
            );
            BillingError::Projection(e.to_string())
        })?;

        Ok(ReconcileOutcome::Applied {
            seller_id,
            subscription,
            projection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PlanCatalog;
    use crate::normalize::{self, Normalized};
    use crate::store::InMemoryBillingStore;
    use bazaar_shared::{BillingTerm, PlanId, SubscriptionStatus};
    use serde_json::json;
    use time::OffsetDateTime;

    fn catalog() -> PlanCatalog {
        PlanCatalog::new([
            (PlanId::Basic, BillingTerm::Monthly, "price_basic_m"),
            (PlanId::Premium, BillingTerm::Quarterly, "price_premium_q"),
        ])
        .unwrap()
    }

    fn received() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_735_000_000).unwrap()
    }

    fn stripe_event(customer: &str, price: &str, status: &str) -> NormalizedEvent {
        let payload = json!({
            "id": "evt_1",
            "type": "customer.subscription.created",
            "created": 1_734_999_000,
            "data": { "object": {
                "id": "sub_1",
                "customer": customer,
                "status": status,
                "cancel_at_period_end": false,
                "current_period_start": 1_734_000_000,
                "current_period_end": 1_741_776_000,
                "items": { "data": [ { "price": { "id": price } } ] }
            } }
        })
        .to_string();

        match normalize::stripe::normalize(&payload, &catalog(), received()).unwrap() {
            Normalized::Subscription(event) => event,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn rc_vip_event(app_user_id: &str) -> NormalizedEvent {
        let payload = json!({
            "event": {
                "app_user_id": app_user_id,
                "entitlements": { "vip": { "active": true } }
            }
        })
        .to_string();

        match normalize::revenuecat::normalize(&payload, received()).unwrap() {
            Normalized::Subscription(event) => event,
            other => panic!("unexpected {:?}", other),
        }
    }

    async fn setup() -> (Arc<InMemoryBillingStore>, ReconciliationEngine, SellerId) {
        let store = Arc::new(InMemoryBillingStore::new());
        let seller = SellerId::new();
        store.link_stripe_customer(seller, "cus_s").await;
        store.link_rc_app_user(seller, "rc_s").await;
        let engine = ReconciliationEngine::new(store.clone());
        (store, engine, seller)
    }

    #[tokio::test]
    async fn test_first_stripe_subscription() {
        let (store, engine, seller) = setup().await;

        let outcome = engine
            .apply(&stripe_event("cus_s", "price_premium_q", "active"))
            .await
            .unwrap();

        let ReconcileOutcome::Applied { projection, .. } = outcome else {
            panic!("expected applied outcome");
        };
        assert_eq!(projection.active_plan_id, PlanId::Premium);
        assert_eq!(projection.subscription_status, Some(SubscriptionStatus::Active));

        let row = store.subscription(seller, Provider::Stripe).await.unwrap();
        assert_eq!(row.plan_id, PlanId::Premium);
        assert_eq!(row.status, SubscriptionStatus::Active);
        assert_eq!(row.external_subscription_ref.as_deref(), Some("sub_1"));
        assert_eq!(
            store.read_projection(seller).await.unwrap(),
            Some(projection)
        );
    }

    #[tokio::test]
    async fn test_second_provider_does_not_downgrade() {
        let (store, engine, seller) = setup().await;

        engine.apply(&rc_vip_event("rc_s")).await.unwrap();
        engine
            .apply(&stripe_event("cus_s", "price_basic_m", "active"))
            .await
            .unwrap();

        assert_eq!(store.list_subscriptions(seller).await.unwrap().len(), 2);
        let projection = store.read_projection(seller).await.unwrap().unwrap();
        assert_eq!(projection.active_plan_id, PlanId::Vip);
        assert_eq!(projection.subscription_status, Some(SubscriptionStatus::Active));
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let (store, engine, seller) = setup().await;
        let event = stripe_event("cus_s", "price_premium_q", "trialing");

        engine.apply(&event).await.unwrap();
        let first = store.subscription(seller, Provider::Stripe).await.unwrap();
        engine.apply(&event).await.unwrap();
        let second = store.subscription(seller, Provider::Stripe).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_falls_back_to_free() {
        let (store, engine, seller) = setup().await;

        engine
            .apply(&stripe_event("cus_s", "price_premium_q", "active"))
            .await
            .unwrap();
        engine
            .apply(&stripe_event("cus_s", "price_premium_q", "canceled"))
            .await
            .unwrap();

        let projection = store.read_projection(seller).await.unwrap().unwrap();
        assert_eq!(projection.active_plan_id, PlanId::Free);
        assert_eq!(projection.subscription_status, Some(SubscriptionStatus::Canceled));
    }

    #[tokio::test]
    async fn test_unroutable_event_writes_nothing() {
        let (store, engine, _) = setup().await;

        let outcome = engine
            .apply(&stripe_event("cus_nobody", "price_basic_m", "active"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Unroutable {
                provider: Provider::Stripe,
                external_customer_ref: "cus_nobody".to_string(),
            }
        );
        assert!(store.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_projection_failure_keeps_row() {
        let (store, engine, seller) = setup().await;
        store.set_fail_projection_writes(true);

        let result = engine
            .apply(&stripe_event("cus_s", "price_premium_q", "active"))
            .await;

        assert!(matches!(result, Err(BillingError::Projection(_))));
        assert!(result.unwrap_err().is_transient());
        assert!(store.subscription(seller, Provider::Stripe).await.is_some());
        assert_eq!(
            store.read_projection(seller).await.unwrap(),
            Some(ProfileProjection::free())
        );

        // The next successful run converges the cache
        store.set_fail_projection_writes(false);
        engine.projector().project(seller).await.unwrap();
        assert_eq!(
            store.read_projection(seller).await.unwrap().unwrap().active_plan_id,
            PlanId::Premium
        );
    }

    #[tokio::test]
    async fn test_storage_failure_is_transient() {
        let (store, engine, _) = setup().await;
        store.set_fail_subscription_writes(true);

        let result = engine
            .apply(&stripe_event("cus_s", "price_basic_m", "active"))
            .await;
        assert!(matches!(result, Err(BillingError::Database(_))));
        assert!(store.subscriptions().await.is_empty());
    }
}
