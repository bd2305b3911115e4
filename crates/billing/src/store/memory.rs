//! In-process adapter for tests and local webhook replays

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bazaar_shared::{Provider, SellerId};
use tokio::sync::RwLock;

use super::{BillingStore, SellerSubscription};
use crate::error::{BillingError, BillingResult};
use crate::projection::ProfileProjection;

#[derive(Debug, Default)]
struct MemoryState {
    stripe_customers: HashMap<String, SellerId>,
    rc_app_users: HashMap<String, SellerId>,
    subscriptions: BTreeMap<(SellerId, Provider), SellerSubscription>,
    projections: HashMap<SellerId, ProfileProjection>,
}

/// `BillingStore` kept in memory, with switchable write failures
#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    state: RwLock<MemoryState>,
    fail_subscription_writes: AtomicBool,
    fail_projection_writes: AtomicBool,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll a seller's Stripe customer id (as checkout would)
    pub async fn link_stripe_customer(&self, seller_id: SellerId, customer_id: &str) {
        let mut state = self.state.write().await;
        state.stripe_customers.insert(customer_id.to_string(), seller_id);
        state
            .projections
            .entry(seller_id)
            .or_insert_with(ProfileProjection::free);
    }

    /// Enroll a seller's RevenueCat app user id (as the mobile app would)
    pub async fn link_rc_app_user(&self, seller_id: SellerId, app_user_id: &str) {
        let mut state = self.state.write().await;
        state.rc_app_users.insert(app_user_id.to_string(), seller_id);
        state
            .projections
            .entry(seller_id)
            .or_insert_with(ProfileProjection::free);
    }

    pub fn set_fail_subscription_writes(&self, fail: bool) {
        self.fail_subscription_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_projection_writes(&self, fail: bool) {
        self.fail_projection_writes.store(fail, Ordering::SeqCst);
    }

    /// Every stored row, ordered by seller then provider
    pub async fn subscriptions(&self) -> Vec<SellerSubscription> {
        self.state.read().await.subscriptions.values().cloned().collect()
    }

    pub async fn subscription(
        &self,
        seller_id: SellerId,
        provider: Provider,
    ) -> Option<SellerSubscription> {
        self.state
            .read()
            .await
            .subscriptions
            .get(&(seller_id, provider))
            .cloned()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn find_seller_by_stripe_customer(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<SellerId>> {
        Ok(self.state.read().await.stripe_customers.get(customer_id).copied())
    }

    async fn find_seller_by_rc_app_user(
        &self,
        app_user_id: &str,
    ) -> BillingResult<Option<SellerId>> {
        Ok(self.state.read().await.rc_app_users.get(app_user_id).copied())
    }

    async fn upsert_subscription(
        &self,
        subscription: &SellerSubscription,
    ) -> BillingResult<SellerSubscription> {
        if self.fail_subscription_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Database(
                "injected subscription write failure".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let key = (subscription.seller_id, subscription.provider);
        let mut stored = subscription.clone();
        if let Some(previous) = state.subscriptions.get(&key) {
            stored.updated_at = stored.updated_at.max(previous.updated_at);
        }
        state.subscriptions.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_subscriptions(
        &self,
        seller_id: SellerId,
    ) -> BillingResult<Vec<SellerSubscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .filter(|row| row.seller_id == seller_id)
            .cloned()
            .collect())
    }

    async fn write_projection(
        &self,
        seller_id: SellerId,
        projection: &ProfileProjection,
    ) -> BillingResult<()> {
        if self.fail_projection_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Database(
                "injected projection write failure".to_string(),
            ));
        }

        self.state
            .write()
            .await
            .projections
            .insert(seller_id, projection.clone());
        Ok(())
    }

    async fn read_projection(
        &self,
        seller_id: SellerId,
    ) -> BillingResult<Option<ProfileProjection>> {
        Ok(self.state.read().await.projections.get(&seller_id).cloned())
    }

    async fn list_seller_ids(&self) -> BillingResult<Vec<SellerId>> {
        let state = self.state.read().await;
        let mut ids: Vec<SellerId> = state.subscriptions.keys().map(|(id, _)| *id).collect();
        ids.dedup();
        Ok(ids)
    }

    async fn ping(&self) -> BillingResult<()> {
        Ok(())
    }
}
