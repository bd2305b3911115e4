//! Price display data for the pricing page

use std::collections::BTreeMap;

use async_trait::async_trait;
use bazaar_shared::{BillingTerm, PlanId};
use serde::Serialize;
use stripe::{Price, PriceId};

use crate::catalog::PlanCatalog;
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Amount and currency of one price; both null when unavailable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriceInfo {
    pub unit_amount: Option<i64>,
    pub currency: Option<String>,
}

/// Source of price details, keyed by Stripe price id
#[async_trait]
pub trait PriceLookup: Send + Sync {
    async fn lookup(&self, price_id: &str) -> BillingResult<PriceInfo>;
}

/// Reads prices from the Stripe API
#[derive(Clone)]
pub struct StripePriceLookup {
    stripe: StripeClient,
}

impl StripePriceLookup {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }
}

#[async_trait]
impl PriceLookup for StripePriceLookup {
    async fn lookup(&self, price_id: &str) -> BillingResult<PriceInfo> {
        let price_id = price_id
            .parse::<PriceId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid price ID: {}", e)))?;

        let price = Price::retrieve(self.stripe.inner(), &price_id, &[]).await?;

        Ok(PriceInfo {
            unit_amount: price.unit_amount,
            currency: price.currency.map(|c| c.to_string()),
        })
    }
}

/// Prices of every paid plan for one term
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanPrices {
    pub term: BillingTerm,
    pub prices: BTreeMap<PlanId, PriceInfo>,
}

/// Look up every paid plan's price for `term`.
///
/// A plan missing from the catalog or failing at Stripe gets null fields;
/// one bad price never fails the whole response.
pub async fn fetch_plan_prices(
    catalog: &PlanCatalog,
    lookup: &dyn PriceLookup,
    term: BillingTerm,
) -> PlanPrices {
    let mut prices = BTreeMap::new();

    for plan in PlanId::ALL.into_iter().filter(PlanId::is_paid) {
        let info = match catalog.price_id(plan, term) {
            Ok(price_id) => match lookup.lookup(price_id).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(
                        plan = %plan,
                        term = %term,
                        price_id = %price_id,
                        error = %e,
                        "Price lookup failed"
                    );
                    PriceInfo::default()
                }
            },
            Err(e) => {
                tracing::debug!(plan = %plan, term = %term, error = %e, "No catalog price");
                PriceInfo::default()
            }
        };
        prices.insert(plan, info);
    }

    PlanPrices { term, prices }
}
