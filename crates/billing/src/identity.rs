//! Identity Resolver
//!
//! Maps a provider's customer handle onto the seller it was enrolled for.
//! Lookups are read-only: a handle nobody enrolled stays unroutable.

use std::sync::Arc;

use bazaar_shared::{Provider, SellerId};

use crate::error::BillingResult;
use crate::normalize::NormalizedEvent;
use crate::store::BillingStore;

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn BillingStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Seller for an event, or `None` when no profile is linked
    pub async fn resolve(&self, event: &NormalizedEvent) -> BillingResult<Option<SellerId>> {
        match event.provider {
            Provider::Stripe => {
                self.store
                    .find_seller_by_stripe_customer(&event.external_customer_ref)
                    .await
            }
            Provider::RevenueCat => {
                if let Some(seller_id) = self
                    .store
                    .find_seller_by_rc_app_user(&event.external_customer_ref)
                    .await?
                {
                    return Ok(Some(seller_id));
                }

                // Transferred subscribers keep their original app user id linked
                match event.original_customer_ref.as_deref() {
                    Some(original) if original != event.external_customer_ref => {
                        let found = self.store.find_seller_by_rc_app_user(original).await?;
                        if found.is_some() {
                            tracing::info!(
                                app_user_id = %event.external_customer_ref,
                                original_app_user_id = %original,
                                "Resolved RevenueCat subscriber by original app user id"
                            );
                        }
                        Ok(found)
                    }
                    _ => Ok(None),
                }
            }
        }
    }
}
