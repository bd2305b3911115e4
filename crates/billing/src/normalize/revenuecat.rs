//! RevenueCat webhook normalizer
//!
//! Two integrations post to the same endpoint with different payload shapes:
//!
//! - **Entitlement set** (`Variant A`): active entitlement keys arrive under
//!   `data.entitlements.active`, `data.customer_info.entitlements.active`, or
//!   the legacy `subscriber.entitlements` map. The plan is the most privileged
//!   key and the status is inferred from the event type.
//! - **Single entitlement** (`Variant B`): `event.entitlements` maps
//!   entitlement id to `{ "active": bool }` and the first active id is the
//!   plan id. These events are always treated as active.
//!
//! The shared secret is checked before this module ever sees the body.

use bazaar_shared::{PlanId, Provider, SubscriptionStatus};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::{from_unix_millis, EventKind, Normalized, NormalizedEvent};
use crate::error::{BillingError, BillingResult};

/// Entitlement keys that map to plans, most privileged first
const PLAN_PRECEDENCE: [PlanId; 4] = [PlanId::VipGold, PlanId::Vip, PlanId::Premium, PlanId::Basic];

/// Payload shape, decided by inspecting the body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevenueCatVariant {
    EntitlementSet,
    SingleEntitlement,
}

impl RevenueCatVariant {
    pub fn detect(body: &Value) -> Option<Self> {
        if body.pointer("/event/entitlements").is_some_and(Value::is_object) {
            return Some(Self::SingleEntitlement);
        }
        if entitlement_set_source(body).is_some() {
            return Some(Self::EntitlementSet);
        }
        None
    }
}

/// Where a Variant A payload keeps its entitlements
enum EntitlementSource<'a> {
    ActiveMap(&'a Map<String, Value>),
    Legacy(&'a Map<String, Value>),
}

fn entitlement_set_source(body: &Value) -> Option<EntitlementSource<'_>> {
    if let Some(active) = body.pointer("/data/entitlements/active").and_then(Value::as_object) {
        return Some(EntitlementSource::ActiveMap(active));
    }
    if let Some(active) = body
        .pointer("/data/customer_info/entitlements/active")
        .and_then(Value::as_object)
    {
        return Some(EntitlementSource::ActiveMap(active));
    }
    body.pointer("/subscriber/entitlements")
        .and_then(Value::as_object)
        .map(EntitlementSource::Legacy)
}

fn str_at<'a>(body: &'a Value, pointer: &str) -> Option<&'a str> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn millis_at(body: &Value, pointer: &str) -> Option<OffsetDateTime> {
    from_unix_millis(body.pointer(pointer).and_then(Value::as_i64))
}

/// Most privileged plan among active entitlement keys (case-insensitive).
/// No matching key means `free`.
pub fn pick_plan<S: AsRef<str>>(active_keys: &[S]) -> PlanId {
    PLAN_PRECEDENCE
        .into_iter()
        .find(|plan| {
            active_keys
                .iter()
                .any(|key| key.as_ref().eq_ignore_ascii_case(plan.as_str()))
        })
        .unwrap_or(PlanId::Free)
}

/// Status for an entitlement-set event
pub fn infer_status(event_type: Option<&str>, has_active: bool) -> SubscriptionStatus {
    if has_active {
        return SubscriptionStatus::Active;
    }

    let event_type = event_type.unwrap_or_default().to_ascii_uppercase();
    if event_type.contains("TRIAL") {
        SubscriptionStatus::Trialing
    } else if event_type.contains("CANCEL") {
        SubscriptionStatus::Canceled
    } else if event_type.contains("EXPIRE") {
        SubscriptionStatus::Expired
    } else if event_type.contains("BILLING_ISSUE") {
        SubscriptionStatus::PastDue
    } else {
        SubscriptionStatus::Expired
    }
}

/// Legacy entitlements are active until `expires_date`; no date means lifetime
fn legacy_entitlement_active(entitlement: &Value, now: OffsetDateTime) -> bool {
    match entitlement.get("expires_date") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) if s.is_empty() => true,
        Some(Value::String(s)) => OffsetDateTime::parse(s, &Rfc3339)
            .map(|expires| expires > now)
            .unwrap_or(false),
        Some(_) => false,
    }
}

/// Normalize an authenticated RevenueCat webhook body
pub fn normalize(payload: &str, received_at: OffsetDateTime) -> BillingResult<Normalized> {
    let body: Value = serde_json::from_str(payload)
        .map_err(|e| BillingError::Normalization(format!("invalid RevenueCat payload: {}", e)))?;

    match RevenueCatVariant::detect(&body) {
        Some(RevenueCatVariant::SingleEntitlement) => normalize_single(&body, received_at),
        Some(RevenueCatVariant::EntitlementSet) => normalize_set(&body, received_at),
        None => {
            // Report the missing user first; it is the more actionable error
            if app_user_id_any(&body).is_none() {
                return Err(BillingError::Normalization("Missing app_user_id".to_string()));
            }
            Err(BillingError::Normalization(
                "missing entitlement data".to_string(),
            ))
        }
    }
}

fn app_user_id_any(body: &Value) -> Option<&str> {
    ["/app_user_id", "/data/app_user_id", "/subscriber/app_user_id", "/event/app_user_id"]
        .into_iter()
        .find_map(|pointer| str_at(body, pointer))
}

fn read_event_type(body: &Value) -> Option<String> {
    str_at(body, "/type")
        .or_else(|| str_at(body, "/event/type"))
        .map(str::to_string)
}

fn normalize_set(body: &Value, received_at: OffsetDateTime) -> BillingResult<Normalized> {
    let app_user_id = app_user_id_any(body)
        .ok_or_else(|| BillingError::Normalization("Missing app_user_id".to_string()))?;

    let active_keys: Vec<&str> = match entitlement_set_source(body) {
        Some(EntitlementSource::ActiveMap(active)) => active.keys().map(String::as_str).collect(),
        Some(EntitlementSource::Legacy(all)) => all
            .iter()
            .filter(|(_, entitlement)| legacy_entitlement_active(entitlement, received_at))
            .map(|(key, _)| key.as_str())
            .collect(),
        None => {
            return Err(BillingError::Normalization(
                "missing entitlement data".to_string(),
            ))
        }
    };

    let event_type = read_event_type(body);
    let has_active = !active_keys.is_empty();
    let plan_id = pick_plan(&active_keys);
    let status = infer_status(event_type.as_deref(), has_active);

    // Auto-renew switched off while access remains
    let cancel_at_period_end = has_active
        && event_type
            .as_deref()
            .is_some_and(|t| t.to_ascii_uppercase().contains("CANCEL"));

    tracing::debug!(
        app_user_id = %app_user_id,
        event_type = ?event_type,
        active_entitlements = ?active_keys,
        plan = %plan_id,
        status = %status,
        "Normalized RevenueCat entitlement-set event"
    );

    Ok(Normalized::Subscription(NormalizedEvent {
        provider: Provider::RevenueCat,
        event_kind: EventKind::EntitlementChanged(event_type),
        external_customer_ref: app_user_id.to_string(),
        external_subscription_ref: None,
        original_customer_ref: str_at(body, "/event/original_app_user_id")
            .or_else(|| str_at(body, "/subscriber/original_app_user_id"))
            .map(str::to_string),
        plan_id: Some(plan_id),
        price_ref: None,
        status,
        period_start: millis_at(body, "/event/purchased_at_ms"),
        period_end: millis_at(body, "/event/expiration_at_ms"),
        trial_end: None,
        cancel_at_period_end,
        occurred_at: millis_at(body, "/event/event_timestamp_ms"),
        received_at,
    }))
}

fn normalize_single(body: &Value, received_at: OffsetDateTime) -> BillingResult<Normalized> {
    let event_type = read_event_type(body);

    let app_user_id = str_at(body, "/event/app_user_id")
        .ok_or_else(|| BillingError::Normalization("Missing app_user_id".to_string()))?;

    let entitlements = body
        .pointer("/event/entitlements")
        .and_then(Value::as_object)
        .ok_or_else(|| BillingError::Normalization("missing entitlement data".to_string()))?;

    let first_active = entitlements.iter().find_map(|(id, entitlement)| {
        (entitlement.get("active").and_then(Value::as_bool) == Some(true)).then_some(id)
    });

    let Some(entitlement_id) = first_active else {
        tracing::info!(app_user_id = %app_user_id, "RevenueCat event has no active entitlement");
        return Ok(Normalized::Ignored {
            kind: EventKind::EntitlementChanged(event_type),
            reason: "no active entitlement",
        });
    };

    let plan_id: PlanId = entitlement_id.parse().map_err(|_| {
        BillingError::Normalization(format!("entitlement {} is not a known plan", entitlement_id))
    })?;

    Ok(Normalized::Subscription(NormalizedEvent {
        provider: Provider::RevenueCat,
        event_kind: EventKind::EntitlementChanged(event_type),
        external_customer_ref: app_user_id.to_string(),
        external_subscription_ref: None,
        original_customer_ref: str_at(body, "/event/original_app_user_id").map(str::to_string),
        plan_id: Some(plan_id),
        price_ref: None,
        // This integration does not model trials or lapses
        status: SubscriptionStatus::Active,
        period_start: Some(received_at),
        period_end: None,
        trial_end: None,
        cancel_at_period_end: false,
        occurred_at: millis_at(body, "/event/event_timestamp_ms"),
        received_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn received() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_735_000_000).unwrap()
    }

    fn expect_subscription(result: Normalized) -> NormalizedEvent {
        match result {
            Normalized::Subscription(event) => event,
            other => panic!("expected subscription snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_pick_plan_precedence() {
        assert_eq!(pick_plan(&["basic", "VIP", "premium"]), PlanId::Vip);
        assert_eq!(pick_plan(&["Vip_Gold", "vip"]), PlanId::VipGold);
        assert_eq!(pick_plan(&["basic"]), PlanId::Basic);
        assert_eq!(pick_plan(&["pro_tools"]), PlanId::Free);
        assert_eq!(pick_plan::<&str>(&[]), PlanId::Free);
    }

    #[test]
    fn test_infer_status_order() {
        assert_eq!(infer_status(Some("CANCELLATION"), true), SubscriptionStatus::Active);
        assert_eq!(infer_status(Some("TRIAL_STARTED"), false), SubscriptionStatus::Trialing);
        // TRIAL is checked before CANCEL
        assert_eq!(infer_status(Some("TRIAL_CANCELLED"), false), SubscriptionStatus::Trialing);
        assert_eq!(infer_status(Some("cancellation"), false), SubscriptionStatus::Canceled);
        assert_eq!(infer_status(Some("EXPIRATION"), false), SubscriptionStatus::Expired);
        assert_eq!(infer_status(Some("BILLING_ISSUE"), false), SubscriptionStatus::PastDue);
        assert_eq!(infer_status(Some("RENEWAL"), false), SubscriptionStatus::Expired);
        assert_eq!(infer_status(None, false), SubscriptionStatus::Expired);
    }

    #[test]
    fn test_variant_detection() {
        let single = json!({ "event": { "app_user_id": "u", "entitlements": {} } });
        assert_eq!(
            RevenueCatVariant::detect(&single),
            Some(RevenueCatVariant::SingleEntitlement)
        );

        let set = json!({ "app_user_id": "u", "data": { "entitlements": { "active": {} } } });
        assert_eq!(RevenueCatVariant::detect(&set), Some(RevenueCatVariant::EntitlementSet));

        let legacy = json!({ "subscriber": { "entitlements": {} } });
        assert_eq!(RevenueCatVariant::detect(&legacy), Some(RevenueCatVariant::EntitlementSet));

        let neither = json!({ "app_user_id": "u", "event": { "type": "RENEWAL" } });
        assert_eq!(RevenueCatVariant::detect(&neither), None);
    }

    #[test]
    fn test_entitlement_set_active() {
        let payload = json!({
            "type": "RENEWAL",
            "app_user_id": "user_1",
            "data": { "entitlements": { "active": { "premium": {}, "basic": {} } } },
            "event": {
                "purchased_at_ms": 1_734_000_000_000_i64,
                "expiration_at_ms": 1_736_592_000_000_i64,
                "event_timestamp_ms": 1_734_999_000_000_i64,
                "original_app_user_id": "$RCAnonymousID:abc"
            }
        })
        .to_string();

        let event = expect_subscription(normalize(&payload, received()).unwrap());
        assert_eq!(event.provider, Provider::RevenueCat);
        assert_eq!(event.external_customer_ref, "user_1");
        assert_eq!(event.original_customer_ref.as_deref(), Some("$RCAnonymousID:abc"));
        assert_eq!(event.plan_id, Some(PlanId::Premium));
        assert_eq!(event.status, SubscriptionStatus::Active);
        assert_eq!(event.period_start.unwrap().unix_timestamp(), 1_734_000_000);
        assert_eq!(event.period_end.unwrap().unix_timestamp(), 1_736_592_000);
        assert_eq!(event.occurred_at.unwrap().unix_timestamp(), 1_734_999_000);
        assert_eq!(
            event.event_kind,
            EventKind::EntitlementChanged(Some("RENEWAL".to_string()))
        );
        assert!(!event.cancel_at_period_end);
    }

    #[test]
    fn test_entitlement_set_customer_info_and_lapse() {
        let payload = json!({
            "event": { "type": "EXPIRATION" },
            "data": {
                "app_user_id": "user_2",
                "customer_info": { "entitlements": { "active": {} } }
            }
        })
        .to_string();

        let event = expect_subscription(normalize(&payload, received()).unwrap());
        assert_eq!(event.external_customer_ref, "user_2");
        assert_eq!(event.plan_id, Some(PlanId::Free));
        assert_eq!(event.status, SubscriptionStatus::Expired);
        assert_eq!(event.period_start, None);
        assert_eq!(event.occurred_at, None);
    }

    #[test]
    fn test_cancellation_with_remaining_access() {
        let payload = json!({
            "type": "CANCELLATION",
            "app_user_id": "user_3",
            "data": { "entitlements": { "active": { "vip": {} } } }
        })
        .to_string();

        let event = expect_subscription(normalize(&payload, received()).unwrap());
        assert_eq!(event.plan_id, Some(PlanId::Vip));
        assert_eq!(event.status, SubscriptionStatus::Active);
        assert!(event.cancel_at_period_end);
    }

    #[test]
    fn test_legacy_subscriber_expiry_filter() {
        let payload = json!({
            "subscriber": {
                "app_user_id": "user_4",
                "entitlements": {
                    "vip_gold": { "expires_date": "2020-01-01T00:00:00Z" },
                    "premium": { "expires_date": "2099-01-01T00:00:00Z" },
                    "basic": { "expires_date": null },
                    "vip": { "expires_date": "not a date" }
                }
            }
        })
        .to_string();

        let event = expect_subscription(normalize(&payload, received()).unwrap());
        assert_eq!(event.external_customer_ref, "user_4");
        assert_eq!(event.plan_id, Some(PlanId::Premium));
        assert_eq!(event.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_legacy_all_expired() {
        let payload = json!({
            "type": "BILLING_ISSUE",
            "subscriber": {
                "app_user_id": "user_5",
                "entitlements": { "vip": { "expires_date": "2024-01-01T00:00:00Z" } }
            }
        })
        .to_string();

        let event = expect_subscription(normalize(&payload, received()).unwrap());
        assert_eq!(event.plan_id, Some(PlanId::Free));
        assert_eq!(event.status, SubscriptionStatus::PastDue);
    }

    #[test]
    fn test_single_entitlement_first_active_wins() {
        let payload = json!({
            "event": {
                "type": "INITIAL_PURCHASE",
                "app_user_id": "rc_user_1",
                "original_app_user_id": "rc_original_1",
                "entitlements": {
                    "basic": { "active": false },
                    "premium": { "active": true },
                    "vip": { "active": true }
                }
            }
        })
        .to_string();

        let event = expect_subscription(normalize(&payload, received()).unwrap());
        assert_eq!(event.external_customer_ref, "rc_user_1");
        assert_eq!(event.original_customer_ref.as_deref(), Some("rc_original_1"));
        assert_eq!(event.plan_id, Some(PlanId::Premium));
        assert_eq!(event.status, SubscriptionStatus::Active);
        assert_eq!(event.period_start, Some(received()));
        assert_eq!(event.period_end, None);
        assert!(!event.cancel_at_period_end);
    }

    #[test]
    fn test_single_entitlement_never_trialing() {
        let payload = json!({
            "event": {
                "type": "TRIAL_STARTED",
                "app_user_id": "rc_user_1",
                "entitlements": { "vip": { "active": true } }
            }
        })
        .to_string();

        let event = expect_subscription(normalize(&payload, received()).unwrap());
        assert_eq!(event.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_single_entitlement_none_active() {
        let payload = json!({
            "event": {
                "app_user_id": "rc_user_1",
                "entitlements": { "vip": { "active": false } }
            }
        })
        .to_string();

        assert!(matches!(
            normalize(&payload, received()).unwrap(),
            Normalized::Ignored { reason: "no active entitlement", .. }
        ));
    }

    #[test]
    fn test_single_entitlement_unknown_id() {
        let payload = json!({
            "event": {
                "app_user_id": "rc_user_1",
                "entitlements": { "pro_tools": { "active": true } }
            }
        })
        .to_string();

        assert!(matches!(
            normalize(&payload, received()),
            Err(BillingError::Normalization(_))
        ));
    }

    #[test]
    fn test_missing_app_user_id() {
        let set = json!({ "data": { "entitlements": { "active": { "vip": {} } } } }).to_string();
        let single = json!({ "event": { "entitlements": { "vip": { "active": true } } } }).to_string();
        let neither = json!({ "type": "RENEWAL" }).to_string();

        for payload in [set, single, neither] {
            match normalize(&payload, received()) {
                Err(BillingError::Normalization(msg)) => assert_eq!(msg, "Missing app_user_id"),
                other => panic!("expected missing app_user_id, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_missing_entitlement_data() {
        let payload = json!({ "app_user_id": "user_6", "type": "RENEWAL" }).to_string();
        match normalize(&payload, received()) {
            Err(BillingError::Normalization(msg)) => assert_eq!(msg, "missing entitlement data"),
            other => panic!("expected missing entitlement data, got {:?}", other),
        }

        assert!(matches!(
            normalize("{not json", received()),
            Err(BillingError::Normalization(_))
        ));
    }
}
