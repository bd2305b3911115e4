//! State Projector
//!
//! Derives a seller's effective plan from all of their subscription rows and
//! caches it on the profile. The profile columns are never the source of
//! truth; re-running the projector from the rows always converges.

use std::cmp::Reverse;
use std::sync::Arc;

use bazaar_shared::{PlanId, SellerId, SubscriptionStatus};
use serde::Serialize;

use crate::error::BillingResult;
use crate::store::{BillingStore, SellerSubscription};

/// Denormalized plan/status shown on the seller profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileProjection {
    pub active_plan_id: PlanId,
    pub subscription_status: Option<SubscriptionStatus>,
}

impl ProfileProjection {
    /// Projection of a seller with no subscription rows
    pub fn free() -> Self {
        Self {
            active_plan_id: PlanId::Free,
            subscription_status: None,
        }
    }
}

/// Pick the projection for one seller's rows.
///
/// Among entitled rows (active or trialing) the highest plan wins; a tie on
/// plan prefers `active`, then the most recently updated row. With no entitled
/// row the seller is on `free` carrying the status of the most recently
/// updated row. Remaining ties go to Stripe.
pub fn select_winner(rows: &[SellerSubscription]) -> ProfileProjection {
    let entitled = rows
        .iter()
        .filter(|row| row.status.is_entitled())
        .max_by_key(|row| {
            (
                row.plan_id,
                row.status == SubscriptionStatus::Active,
                row.updated_at,
                Reverse(row.provider),
            )
        });

    if let Some(winner) = entitled {
        return ProfileProjection {
            active_plan_id: winner.plan_id,
            subscription_status: Some(winner.status),
        };
    }

    rows.iter()
        .max_by_key(|row| (row.updated_at, Reverse(row.provider)))
        .map(|latest| ProfileProjection {
            active_plan_id: PlanId::Free,
            subscription_status: Some(latest.status),
        })
        .unwrap_or_else(ProfileProjection::free)
}

/// Outcome of a batch re-sync
#[derive(Debug, Default, Serialize)]
pub struct ResyncReport {
    pub projected: Vec<(SellerId, ProfileProjection)>,
    pub failed: Vec<(SellerId, String)>,
}

/// Recomputes and stores profile projections
#[derive(Clone)]
pub struct StateProjector {
    store: Arc<dyn BillingStore>,
}

impl StateProjector {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Compute a seller's projection without writing it
    pub async fn compute(&self, seller_id: SellerId) -> BillingResult<ProfileProjection> {
        let rows = self.store.list_subscriptions(seller_id).await?;
        Ok(select_winner(&rows))
    }

    /// Compute and store a seller's projection
    pub async fn project(&self, seller_id: SellerId) -> BillingResult<ProfileProjection> {
        let projection = self.compute(seller_id).await?;
        self.store.write_projection(seller_id, &projection).await?;

        tracing::debug!(
            seller_id = %seller_id,
            plan = %projection.active_plan_id,
            status = ?projection.subscription_status,
            "Profile projection updated"
        );

        Ok(projection)
    }

    /// Re-sync every seller that has subscription rows.
    /// A failing seller is recorded in the report and the batch continues.
    pub async fn project_all(&self, dry_run: bool) -> BillingResult<ResyncReport> {
        let sellers = self.store.list_seller_ids().await?;
        let mut report = ResyncReport::default();

        for seller_id in sellers {
            let result = if dry_run {
                self.compute(seller_id).await
            } else {
                self.project(seller_id).await
            };

            match result {
                Ok(projection) => report.projected.push((seller_id, projection)),
                Err(e) => {
                    tracing::error!(seller_id = %seller_id, error = %e, "Failed to re-sync projection");
                    report.failed.push((seller_id, e.to_string()));
                }
            }
        }

        tracing::info!(
            projected = report.projected.len(),
            failed = report.failed.len(),
            dry_run = dry_run,
            "Projection re-sync complete"
        );

        Ok(report)
    }
}
