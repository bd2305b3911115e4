//! Webhook authentication
//!
//! Stripe signs the raw body: `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`
//! where each `v1` is HMAC-SHA256 over `"{t}.{body}"` keyed with the endpoint's
//! signing secret. Several `v1` entries appear while a secret is being rolled;
//! any one of them may match.
//!
//! RevenueCat sends a static shared secret which is compared for exact equality.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Parsed `Stripe-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: i64,
    v1_signatures: Vec<String>,
}

impl SignatureHeader {
    fn parse(header: &str) -> BillingResult<Self> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                match key {
                    "t" => timestamp = value.parse().ok(),
                    "v1" => v1_signatures.push(value.to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            BillingError::Unauthorized("missing timestamp in signature header".to_string())
        })?;

        if v1_signatures.is_empty() {
            return Err(BillingError::Unauthorized(
                "missing v1 signature in signature header".to_string(),
            ));
        }

        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

fn stripe_mac(secret: &str, timestamp: i64, payload: &str) -> BillingResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("invalid webhook signing secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Verify a Stripe webhook signature against the current time.
/// Returns the signed timestamp on success.
pub fn verify_stripe_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: i64,
) -> BillingResult<i64> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    verify_stripe_signature_at(payload, header, secret, tolerance_secs, now)
}

/// Verify a Stripe webhook signature as of `now` (Unix seconds)
pub fn verify_stripe_signature_at(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> BillingResult<i64> {
    if secret.is_empty() {
        return Err(BillingError::Config(
            "webhook signing secret is empty".to_string(),
        ));
    }

    let parsed = SignatureHeader::parse(header)?;

    // The header timestamp is untrusted and may sit at the i64 extremes
    if now.abs_diff(parsed.timestamp) > tolerance_secs.unsigned_abs() {
        tracing::warn!(
            timestamp = parsed.timestamp,
            now = now,
            tolerance_secs = tolerance_secs,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::Unauthorized(
            "timestamp outside the tolerance zone".to_string(),
        ));
    }

    let mac = stripe_mac(secret, parsed.timestamp, payload)?;

    let matched = parsed.v1_signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if !matched {
        return Err(BillingError::Unauthorized(
            "no signature matches the payload".to_string(),
        ));
    }

    Ok(parsed.timestamp)
}

/// Produce a `Stripe-Signature` header value for a payload.
/// Used by tooling and tests that replay webhooks locally.
pub fn sign_stripe_payload(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let mac = stripe_mac(secret, timestamp, payload)?;
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={},v1={}", timestamp, signature))
}

/// Exact, constant-time comparison of a shared secret.
/// An empty configured secret rejects every request.
pub fn verify_shared_secret(provided: Option<&str>, expected: &str) -> BillingResult<()> {
    let provided = provided.unwrap_or_default();
    if expected.is_empty() || provided.is_empty() {
        return Err(BillingError::Unauthorized("Invalid secret".to_string()));
    }

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(BillingError::Unauthorized("Invalid secret".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &str = r#"{"id":"evt_1","type":"invoice.paid"}"#;
    const NOW: i64 = 1_735_000_000;

    #[test]
    fn test_round_trip_signature() {
        let header = sign_stripe_payload(SECRET, NOW, PAYLOAD).unwrap();
        let ts = verify_stripe_signature_at(PAYLOAD, &header, SECRET, 300, NOW + 10).unwrap();
        assert_eq!(ts, NOW);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = sign_stripe_payload(SECRET, NOW, PAYLOAD).unwrap();
        let result = verify_stripe_signature_at(
            r#"{"id":"evt_1","type":"invoice.paid","x":1}"#,
            &header,
            SECRET,
            300,
            NOW,
        );
        assert!(matches!(result, Err(BillingError::Unauthorized(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = sign_stripe_payload("whsec_other", NOW, PAYLOAD).unwrap();
        let result = verify_stripe_signature_at(PAYLOAD, &header, SECRET, 300, NOW);
        assert!(matches!(result, Err(BillingError::Unauthorized(_))));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let header = sign_stripe_payload(SECRET, NOW, PAYLOAD).unwrap();
        let result = verify_stripe_signature_at(PAYLOAD, &header, SECRET, 300, NOW + 301);
        assert!(matches!(result, Err(BillingError::Unauthorized(_))));
    }

    #[test]
    fn test_extreme_timestamps_rejected_without_overflow() {
        for t in [i64::MIN, i64::MAX, -1] {
            let header = format!("t={},v1=00", t);
            let result = verify_stripe_signature_at(PAYLOAD, &header, SECRET, 300, NOW);
            assert!(
                matches!(result, Err(BillingError::Unauthorized(_))),
                "t={} should be rejected",
                t
            );
        }

        let header = "t=-9223372036854775808,v1=00";
        let result = verify_stripe_signature_at(PAYLOAD, header, SECRET, 300, i64::MAX);
        assert!(matches!(result, Err(BillingError::Unauthorized(_))));
    }

    #[test]
    fn test_any_v1_may_match() {
        let good = sign_stripe_payload(SECRET, NOW, PAYLOAD).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={},v0=legacy", NOW, "00".repeat(32), good_sig);
        assert!(verify_stripe_signature_at(PAYLOAD, &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        for header in ["", "v1=abcd", "t=notanumber,v1=abcd", &format!("t={}", NOW)] {
            let result = verify_stripe_signature_at(PAYLOAD, header, SECRET, 300, NOW);
            assert!(
                matches!(result, Err(BillingError::Unauthorized(_))),
                "header {:?} should be rejected",
                header
            );
        }
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let header = format!("t={},v1=zzzz", NOW);
        let result = verify_stripe_signature_at(PAYLOAD, &header, SECRET, 300, NOW);
        assert!(matches!(result, Err(BillingError::Unauthorized(_))));
    }

    #[test]
    fn test_shared_secret() {
        assert!(verify_shared_secret(Some("s3cret"), "s3cret").is_ok());
        assert!(verify_shared_secret(Some("s3cret "), "s3cret").is_err());
        assert!(verify_shared_secret(Some("S3CRET"), "s3cret").is_err());
        assert!(verify_shared_secret(None, "s3cret").is_err());
        // Unconfigured secret must never authorize, even an empty header
        assert!(verify_shared_secret(Some(""), "").is_err());
    }
}
