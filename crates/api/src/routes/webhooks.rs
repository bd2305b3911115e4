//! Billing provider webhooks
//!
//! Both endpoints take the raw body: the Stripe signature covers the exact
//! bytes sent. Anything other than a 2xx makes the provider retry, so
//! unroutable and no-op events are acknowledged with 200.

use axum::{
    extract::{rejection::StringRejection, State},
    http::HeaderMap,
    Json,
};
use bazaar_billing::{BillingError, ReconcileOutcome, WebhookOutcome};
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Candidate secrets sent by RevenueCat: `Authorization: Bearer <secret>`,
/// a bare `Authorization` value, then `X-RC-Webhook-Secret` from the older
/// integration. A proxy may add its own `Authorization`, so both are kept.
pub fn revenuecat_secrets(headers: &HeaderMap) -> Vec<&str> {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|auth| auth.strip_prefix("Bearer ").unwrap_or(auth));

    let legacy = headers
        .get("x-rc-webhook-secret")
        .and_then(|v| v.to_str().ok());

    authorization.into_iter().chain(legacy).collect()
}

/// Handle Stripe webhook
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<String, StringRejection>,
) -> ApiResult<Json<Value>> {
    let body = body?;
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .billing
        .handle_stripe_webhook(&body, signature)
        .await
        .map_err(|e| match e {
            BillingError::Unauthorized(msg) => ApiError::InvalidSignature(msg),
            other => other.into(),
        })?;

    if let WebhookOutcome::Reconciled {
        outcome: ReconcileOutcome::Unroutable { .. },
        ..
    } = outcome
    {
        tracing::warn!("Stripe webhook acknowledged without a linked seller");
    }

    Ok(Json(json!({ "ok": true })))
}

/// Handle RevenueCat webhook
pub async fn revenuecat_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<String, StringRejection>,
) -> ApiResult<Json<Value>> {
    let body = body?;
    tracing::info!(body_len = body.len(), "RevenueCat webhook received");

    let outcome = state
        .billing
        .handle_revenuecat_webhook(&body, &revenuecat_secrets(&headers))
        .await?;

    let response = match outcome {
        WebhookOutcome::Ignored { reason, .. } => json!({ "ok": true, "note": reason }),
        WebhookOutcome::Reconciled {
            outcome: ReconcileOutcome::Unroutable { .. },
            ..
        } => json!({ "ok": true, "note": "no profile" }),
        WebhookOutcome::Reconciled {
            event,
            outcome: ReconcileOutcome::Applied { .. },
        } => json!({
            "ok": true,
            "app_user_id": event.external_customer_ref,
            "plan": event.plan_id,
            "status": event.status,
        }),
    };

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_revenuecat_secret_sources() {
        let mut headers = HeaderMap::new();
        assert!(revenuecat_secrets(&headers).is_empty());

        headers.insert("x-rc-webhook-secret", HeaderValue::from_static("legacy"));
        assert_eq!(revenuecat_secrets(&headers), vec!["legacy"]);

        headers.insert("authorization", HeaderValue::from_static("bare-secret"));
        assert_eq!(revenuecat_secrets(&headers), vec!["bare-secret", "legacy"]);

        headers.insert("authorization", HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(revenuecat_secrets(&headers), vec!["s3cret", "legacy"]);
    }
}
