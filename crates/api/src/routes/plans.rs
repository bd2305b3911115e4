//! Plan price endpoints for the pricing page

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, State},
    Json,
};
use bazaar_billing::PlanPrices;
use bazaar_shared::{BillingTerm, PlanId};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct PriceIdResponse {
    pub plan_id: PlanId,
    pub term: BillingTerm,
    pub price_id: String,
}

/// Stripe price id for one plan and term
pub async fn get_price_id(
    State(state): State<AppState>,
    Path((plan_id, term)): Path<(String, String)>,
) -> ApiResult<Json<PriceIdResponse>> {
    let (plan_id, term, price_id) = state.billing.price_id(&plan_id, &term)?;

    Ok(Json(PriceIdResponse {
        plan_id,
        term,
        price_id,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct PlanPricesRequest {
    pub term: Option<String>,
}

/// Amount and currency of every paid plan for a term (default monthly).
/// An empty or malformed JSON body counts as `{}`.
pub async fn list_plan_prices(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<PlanPrices>> {
    let body = body?;
    let request: PlanPricesRequest = serde_json::from_slice(&body).unwrap_or_default();

    let term = match request.term.as_deref() {
        None => BillingTerm::default(),
        Some(raw) => raw
            .parse::<BillingTerm>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };

    Ok(Json(state.billing.plan_prices(term).await))
}
