//! API routes

pub mod health;
pub mod plans;
pub mod subscription;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth::{require_admin, require_auth},
    state::AppState,
};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Stripe webhook (public, uses signature verification)
    let webhook_routes = Router::new().route("/stripe/webhook", post(subscription::webhook));

    // Public API routes (no auth required) - under /api/v1
    let public_api_routes = Router::new()
        .route("/subscription-plans", get(plans::list_plans))
        .route("/subscription-plans/:plan_id", get(plans::get_plan));

    // Protected API routes (auth required) - under /api/v1
    let protected_api_routes = Router::new()
        .route("/subscription/create", post(subscription::create_subscription))
        .route("/subscription/change", post(subscription::change_subscription))
        .route("/subscription/cancel", post(subscription::cancel_subscription))
        .route("/subscription/current", get(subscription::get_current))
        .route("/subscription/status", get(subscription::get_status))
        .route("/subscription/invoices", get(subscription::list_invoices))
        .route(
            "/subscription/payment-method/update",
            post(subscription::update_payment_method),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Admin plan catalog routes (auth + admin role)
    let admin_api_routes = Router::new()
        .route("/admin/subscription-plans", post(plans::create_plan))
        .route("/admin/subscription-plans/:plan_id", put(plans::update_plan))
        .route(
            "/admin/subscription-plans/:plan_id",
            delete(plans::delete_plan),
        )
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Combine API routes under /api/v1 prefix
    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes)
        .merge(admin_api_routes);

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB request limit
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
