//! Route registration.

pub mod billing;

use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/plans", get(billing::list_plans))
        .route("/checkout/session", post(billing::create_checkout_session))
        .route("/webhooks/stripe", post(billing::stripe_webhook))
        .route("/webhooks/razorpay", post(billing::razorpay_webhook))
        .route(
            "/subscriptions/{id}",
            patch(billing::update_subscription).get(billing::get_subscription),
        )
        .route(
            "/subscriptions/{id}/cancel",
            post(billing::cancel_subscription),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
