//! API routes

pub mod health;
pub mod plans;
pub mod webhooks;

use axum::{
    error_handling::HandleErrorLayer,
    extract::DefaultBodyLimit,
    routing::{get, post},
    BoxError, Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{error::ApiError, state::AppState};

/// Provider webhooks and price requests are small
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Requests that outlive the timeout answer 500 so the provider retries
async fn handle_middleware_error(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::error!("Request timed out");
        ApiError::Timeout
    } else {
        tracing::error!(error = %err, "Unhandled middleware error");
        ApiError::Internal
    }
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn route_not_found() -> ApiError {
    ApiError::NotFound("Route not found".to_string())
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Provider webhooks (authenticated by signature / shared secret, not by session)
    let webhook_routes = Router::new()
        .route(
            "/webhooks/stripe",
            post(webhooks::stripe_webhook).fallback(method_not_allowed),
        )
        .route(
            "/webhooks/revenuecat",
            post(webhooks::revenuecat_webhook).fallback(method_not_allowed),
        );

    // Called from the browser pricing page
    let plan_routes = Router::new()
        .route(
            "/plans/prices",
            post(plans::list_plan_prices).fallback(method_not_allowed),
        )
        .route(
            "/plans/:plan_id/prices/:term",
            get(plans::get_price_id).fallback(method_not_allowed),
        )
        .layer(CorsLayer::permissive());

    let api_v1_routes = Router::new().merge(webhook_routes).merge(plan_routes);

    let request_timeout = state.config.request_timeout;

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .fallback(route_not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(request_timeout),
        )
        .with_state(state)
}
