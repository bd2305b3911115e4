//! Stripe webhook normalizer
//!
//! Only `customer.subscription.*` events carry subscription state. Checkout and
//! invoice events are acknowledged without action: the subscription events that
//! follow them carry everything we persist.

use std::collections::HashMap;

use bazaar_shared::{PlanId, Provider, SubscriptionStatus};
use serde::Deserialize;
use time::OffsetDateTime;

use super::{from_unix_seconds, EventKind, Normalized, NormalizedEvent};
use crate::catalog::PlanCatalog;
use crate::error::{BillingError, BillingResult};

/// Plan recorded when neither price metadata nor the catalog identify the plan.
///
/// Known risk: a paid premium/vip purchase whose price id is missing from the
/// catalog is recorded as basic. Kept so a paying customer's webhook is never
/// rejected because of catalog drift.
pub const FALLBACK_PLAN: PlanId = PlanId::Basic;

#[derive(Debug, Deserialize)]
struct StripeEnvelope {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    created: Option<i64>,
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    customer: CustomerRef,
    status: String,
    #[serde(default)]
    items: Option<ItemList>,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    cancel_at_period_end: Option<bool>,
    trial_end: Option<i64>,
}

/// `customer` is an id unless the event was sent with expansion
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CustomerRef {
    Id(String),
    Expanded { id: String },
}

impl CustomerRef {
    fn into_id(self) -> String {
        match self {
            CustomerRef::Id(id) | CustomerRef::Expanded { id } => id,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ItemList {
    #[serde(default)]
    data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    price: Option<StripePrice>,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
    metadata: Option<HashMap<String, String>>,
}

/// Decide which plan a Stripe price sells.
///
/// Order: explicit `plan_id` price metadata, then reverse lookup of the price id
/// in the catalog, then [`FALLBACK_PLAN`].
pub fn resolve_plan(
    metadata_plan: Option<&str>,
    price_id: Option<&str>,
    catalog: &PlanCatalog,
) -> PlanId {
    if let Some(raw) = metadata_plan {
        match raw.parse::<PlanId>() {
            Ok(plan) => return plan,
            Err(_) => tracing::warn!(
                metadata_plan = %raw,
                "Price metadata names an unknown plan; trying catalog lookup"
            ),
        }
    }

    if let Some(plan) = price_id.and_then(|id| catalog.plan_for_price(id)) {
        return plan;
    }

    tracing::warn!(
        price_id = ?price_id,
        fallback_plan = %FALLBACK_PLAN,
        "Stripe price not found in plan catalog; recording fallback plan"
    );
    FALLBACK_PLAN
}

/// Normalize a verified Stripe webhook body
pub fn normalize(
    payload: &str,
    catalog: &PlanCatalog,
    received_at: OffsetDateTime,
) -> BillingResult<Normalized> {
    let envelope: StripeEnvelope = serde_json::from_str(payload)
        .map_err(|e| BillingError::Normalization(format!("invalid Stripe event: {}", e)))?;

    let kind = EventKind::from_stripe_type(&envelope.event_type);
    tracing::debug!(
        event_id = ?envelope.id,
        event_type = %envelope.event_type,
        "Normalizing Stripe event"
    );

    if !kind.carries_subscription() {
        let reason = match kind {
            EventKind::Unrecognized(_) => "unhandled event type",
            _ => "subscription events carry the state",
        };
        return Ok(Normalized::Ignored { kind, reason });
    }

    let object = envelope
        .data
        .map(|d| d.object)
        .ok_or_else(|| BillingError::Normalization("event has no data.object".to_string()))?;

    let subscription: StripeSubscription = serde_json::from_value(object).map_err(|e| {
        BillingError::Normalization(format!("data.object is not a subscription: {}", e))
    })?;

    let status: SubscriptionStatus = subscription.status.parse().map_err(|_| {
        BillingError::Normalization(format!(
            "unsupported subscription status: {}",
            subscription.status
        ))
    })?;

    let first_item = subscription
        .items
        .as_ref()
        .and_then(|items| items.data.first());
    let price = first_item.and_then(|item| item.price.as_ref());
    let price_id = price.map(|p| p.id.clone());
    let metadata_plan = price
        .and_then(|p| p.metadata.as_ref())
        .and_then(|m| m.get("plan_id"))
        .map(String::as_str);

    let plan_id = resolve_plan(metadata_plan, price_id.as_deref(), catalog);

    // Newer API versions report the billing period per item
    let period_start = subscription
        .current_period_start
        .or_else(|| first_item.and_then(|i| i.current_period_start));
    let period_end = subscription
        .current_period_end
        .or_else(|| first_item.and_then(|i| i.current_period_end));

    Ok(Normalized::Subscription(NormalizedEvent {
        provider: Provider::Stripe,
        event_kind: kind,
        external_customer_ref: subscription.customer.into_id(),
        external_subscription_ref: Some(subscription.id),
        original_customer_ref: None,
        plan_id: Some(plan_id),
        price_ref: price_id,
        status,
        period_start: from_unix_seconds(period_start),
        period_end: from_unix_seconds(period_end),
        trial_end: from_unix_seconds(subscription.trial_end),
        cancel_at_period_end: subscription.cancel_at_period_end.unwrap_or(false),
        occurred_at: from_unix_seconds(envelope.created),
        received_at,
    }))
}
