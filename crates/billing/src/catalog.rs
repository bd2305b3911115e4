//! Plan Catalog
//!
//! Maps each paid plan and billing term to its Stripe price id. Lookups run in
//! both directions: checkout and the price endpoints go plan → price, while the
//! Stripe normalizer goes price → plan when price metadata is missing.
//!
//! The catalog is at most 4 plans × 4 terms, so reverse lookup is a linear scan.
//! Duplicate price ids would make reverse lookup ambiguous, so construction
//! rejects them.

use std::collections::{BTreeMap, HashSet};

use bazaar_shared::{BillingTerm, PlanId};

use crate::error::{BillingError, BillingResult};

/// Stripe price ids keyed by plan and term
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    prices: BTreeMap<PlanId, BTreeMap<BillingTerm, String>>,
}

impl PlanCatalog {
    /// Build a catalog from `(plan, term, price_id)` entries
    pub fn new<I, S>(entries: I) -> BillingResult<Self>
    where
        I: IntoIterator<Item = (PlanId, BillingTerm, S)>,
        S: Into<String>,
    {
        let mut prices: BTreeMap<PlanId, BTreeMap<BillingTerm, String>> = BTreeMap::new();
        let mut seen = HashSet::new();

        for (plan, term, price_id) in entries {
            let price_id = price_id.into();
            if !plan.is_paid() {
                return Err(BillingError::Config(format!(
                    "plan {} cannot carry a price ({})",
                    plan, price_id
                )));
            }
            if !seen.insert(price_id.clone()) {
                return Err(BillingError::Config(format!(
                    "price id {} is mapped to more than one plan/term",
                    price_id
                )));
            }
            if prices
                .entry(plan)
                .or_default()
                .insert(term, price_id)
                .is_some()
            {
                return Err(BillingError::Config(format!(
                    "duplicate catalog entry for {}:{}",
                    plan, term
                )));
            }
        }

        Ok(Self { prices })
    }

    /// Load the catalog from `STRIPE_PRICE_<PLAN>_<TERM>` environment variables
    /// (e.g. `STRIPE_PRICE_VIP_GOLD_ANNUAL`). Unset or empty variables are skipped.
    pub fn from_env() -> BillingResult<Self> {
        let mut entries = Vec::new();
        for plan in PlanId::ALL.into_iter().filter(PlanId::is_paid) {
            for term in BillingTerm::ALL {
                let key = Self::env_key(plan, term);
                if let Ok(price_id) = std::env::var(&key) {
                    let price_id = price_id.trim().to_string();
                    if !price_id.is_empty() {
                        entries.push((plan, term, price_id));
                    }
                }
            }
        }

        let catalog = Self::new(entries)?;
        if catalog.is_empty() {
            tracing::warn!("Plan catalog is empty; every Stripe price will fall back to basic");
        }
        Ok(catalog)
    }

    fn env_key(plan: PlanId, term: BillingTerm) -> String {
        format!(
            "STRIPE_PRICE_{}_{}",
            plan.as_str().to_uppercase(),
            term.as_str().to_uppercase()
        )
    }

    /// Get the price id for a plan and term
    pub fn price_id(&self, plan: PlanId, term: BillingTerm) -> BillingResult<&str> {
        let by_term = self
            .prices
            .get(&plan)
            .ok_or_else(|| BillingError::UnknownPlan(plan.to_string()))?;

        by_term
            .get(&term)
            .map(String::as_str)
            .ok_or_else(|| BillingError::UnknownTerm {
                plan: plan.to_string(),
                term: term.to_string(),
            })
    }

    /// Resolve loosely-typed plan and term names (as received over HTTP)
    pub fn resolve(&self, plan: &str, term: &str) -> BillingResult<(PlanId, BillingTerm, &str)> {
        let plan_id: PlanId = plan
            .parse()
            .map_err(|_| BillingError::UnknownPlan(plan.to_string()))?;
        let billing_term: BillingTerm = term.parse().map_err(|_| BillingError::UnknownTerm {
            plan: plan_id.to_string(),
            term: term.to_string(),
        })?;

        let price_id = self.price_id(plan_id, billing_term)?;
        Ok((plan_id, billing_term, price_id))
    }

    /// Reverse lookup: which plan sells this price id?
    pub fn plan_for_price(&self, price_id: &str) -> Option<PlanId> {
        self.prices.iter().find_map(|(plan, by_term)| {
            by_term
                .values()
                .any(|candidate| candidate == price_id)
                .then_some(*plan)
        })
    }

    /// Plans present in the catalog, in ascending privilege order
    pub fn plans(&self) -> impl Iterator<Item = PlanId> + '_ {
        self.prices.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
