//! Event Normalizer
//!
//! Each provider adapter turns a loosely-typed webhook payload into a
//! [`NormalizedEvent`]: one provider-agnostic snapshot of a subscription's
//! state. Events that carry no subscription state (checkout completion,
//! invoices, unknown kinds) normalize to [`Normalized::Ignored`] so the
//! endpoint can still acknowledge them.

pub mod revenuecat;
pub mod stripe;

use bazaar_shared::{PlanId, Provider, SubscriptionStatus};
use serde::Serialize;
use time::OffsetDateTime;

/// What happened at the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    CheckoutCompleted,
    InvoicePaid,
    InvoicePaymentFailed,
    /// RevenueCat entitlement change, carrying the provider's event type if any
    EntitlementChanged(Option<String>),
    Unrecognized(String),
}

impl EventKind {
    /// Map a Stripe `type` field
    pub fn from_stripe_type(event_type: &str) -> Self {
        match event_type {
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "checkout.session.completed" => Self::CheckoutCompleted,
            "invoice.paid" => Self::InvoicePaid,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Whether the event carries a full subscription snapshot
    pub fn carries_subscription(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionCreated
                | Self::SubscriptionUpdated
                | Self::SubscriptionDeleted
                | Self::EntitlementChanged(_)
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SubscriptionCreated => write!(f, "subscription_created"),
            Self::SubscriptionUpdated => write!(f, "subscription_updated"),
            Self::SubscriptionDeleted => write!(f, "subscription_deleted"),
            Self::CheckoutCompleted => write!(f, "checkout_completed"),
            Self::InvoicePaid => write!(f, "invoice_paid"),
            Self::InvoicePaymentFailed => write!(f, "invoice_payment_failed"),
            Self::EntitlementChanged(Some(t)) => write!(f, "entitlement_changed:{}", t),
            Self::EntitlementChanged(None) => write!(f, "entitlement_changed"),
            Self::Unrecognized(t) => write!(f, "unrecognized:{}", t),
        }
    }
}

/// Canonical, provider-agnostic billing event.
///
/// Every event is a full snapshot of the subscription: `None` fields mean
/// "unknown" and are persisted as null, never merged with earlier state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedEvent {
    pub provider: Provider,
    pub event_kind: EventKind,
    /// Stripe customer id / RevenueCat app user id
    pub external_customer_ref: String,
    /// Stripe subscription id (RevenueCat has none)
    pub external_subscription_ref: Option<String>,
    /// RevenueCat original (pre-transfer) app user id
    pub original_customer_ref: Option<String>,
    pub plan_id: Option<PlanId>,
    /// Stripe price id the plan was derived from
    pub price_ref: Option<String>,
    pub status: SubscriptionStatus,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    /// When the provider says the event happened, if it says
    pub occurred_at: Option<OffsetDateTime>,
    /// When we received the event
    pub received_at: OffsetDateTime,
}

impl NormalizedEvent {
    /// Timestamp recorded as the row's `updated_at`
    pub fn effective_at(&self) -> OffsetDateTime {
        self.occurred_at.unwrap_or(self.received_at)
    }
}

/// Result of normalizing one webhook payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// A subscription snapshot to reconcile
    Subscription(NormalizedEvent),
    /// Acknowledge without touching state
    Ignored { kind: EventKind, reason: &'static str },
}

/// Convert Unix seconds into an absolute timestamp
pub(crate) fn from_unix_seconds(secs: Option<i64>) -> Option<OffsetDateTime> {
    secs.and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
}

/// Convert Unix milliseconds into an absolute timestamp
pub(crate) fn from_unix_millis(millis: Option<i64>) -> Option<OffsetDateTime> {
    millis.and_then(|ms| {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
    })
}
