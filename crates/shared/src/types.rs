//! Core domain types for Bazaar seller subscriptions

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UnknownVariant;

// =============================================================================
// ID Types
// =============================================================================

/// Seller ID wrapper (the seller's profile / auth user id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SellerId(pub Uuid);

impl SellerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SellerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SellerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SellerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Seller plan, ordered by privilege: Free < Basic < Premium < Vip < VipGold
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    #[default]
    Free,
    Basic,
    Premium,
    Vip,
    VipGold,
}

impl PlanId {
    /// All plans in ascending privilege order
    pub const ALL: [PlanId; 5] = [
        PlanId::Free,
        PlanId::Basic,
        PlanId::Premium,
        PlanId::Vip,
        PlanId::VipGold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Vip => "vip",
            Self::VipGold => "vip_gold",
        }
    }

    /// Whether this plan is sold through a provider (everything but Free)
    pub fn is_paid(&self) -> bool {
        *self != Self::Free
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanId {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "basic" => Ok(Self::Basic),
            "premium" => Ok(Self::Premium),
            "vip" => Ok(Self::Vip),
            "vip_gold" => Ok(Self::VipGold),
            _ => Err(UnknownVariant::new("plan", s)),
        }
    }
}

/// Billing provider that owns a subscription row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Card subscriptions (web checkout)
    Stripe,
    /// Mobile in-app purchases
    RevenueCat,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::RevenueCat => "revenuecat",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(Self::Stripe),
            "revenuecat" => Ok(Self::RevenueCat),
            _ => Err(UnknownVariant::new("provider", s)),
        }
    }
}

/// Subscription status as recorded on a subscription row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }

    /// Statuses that grant the plan's entitlements
    pub fn is_entitled(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "trialing" => Ok(Self::Trialing),
            "past_due" => Ok(Self::PastDue),
            "canceled" => Ok(Self::Canceled),
            "expired" => Ok(Self::Expired),
            _ => Err(UnknownVariant::new("subscription status", s)),
        }
    }
}

/// Billing term of a card subscription price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingTerm {
    #[default]
    Monthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl BillingTerm {
    pub const ALL: [BillingTerm; 4] = [
        BillingTerm::Monthly,
        BillingTerm::Quarterly,
        BillingTerm::Semiannual,
        BillingTerm::Annual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Semiannual => "semiannual",
            Self::Annual => "annual",
        }
    }
}

impl std::fmt::Display for BillingTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BillingTerm {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "semiannual" => Ok(Self::Semiannual),
            "annual" => Ok(Self::Annual),
            _ => Err(UnknownVariant::new("billing term", s)),
        }
    }
}
