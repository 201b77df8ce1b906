//! Billing endpoints.
//!
//! Webhook handlers take the raw request body as bytes; signature
//! verification runs over exactly what arrived on the wire, before any
//! JSON parsing.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chatdesk_billing::BillingStore;
use chatdesk_shared::GatewayKind;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
const RAZORPAY_SIGNATURE_HEADER: &str = "x-razorpay-signature";

fn envelope<T: serde::Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let plans = state.billing.store.list_plans().await?;
    Ok(envelope(plans))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    pub plan_id: Option<String>,
    pub seats: Option<i32>,
    pub tenant_id: Option<String>,
}

pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(body): Json<CheckoutSessionRequest>,
) -> ApiResult<Json<Value>> {
    let plan_id = body
        .plan_id
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("planId is required".to_string()))?;
    let seats = body
        .seats
        .ok_or_else(|| ApiError::Validation("seats is required".to_string()))?;
    let tenant_id = body
        .tenant_id
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("tenantId is required".to_string()))?;

    let session = state
        .billing
        .checkout
        .create_session(&plan_id, seats, &tenant_id)
        .await?;
    Ok(envelope(session))
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    ingest_webhook(&state, GatewayKind::Stripe, STRIPE_SIGNATURE_HEADER, &headers, &body).await
}

pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    ingest_webhook(
        &state,
        GatewayKind::Razorpay,
        RAZORPAY_SIGNATURE_HEADER,
        &headers,
        &body,
    )
    .await
}

async fn ingest_webhook(
    state: &AppState,
    kind: GatewayKind,
    header_name: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers.get(header_name).and_then(|v| v.to_str().ok());
    state.billing.webhooks.ingest(kind, body, signature).await?;
    Ok(envelope(json!({ "received": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionRequest {
    pub seats: Option<i32>,
    pub auto_renew: Option<bool>,
}

pub async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Json<Value>> {
    if body.seats.is_none() && body.auto_renew.is_none() {
        return Err(ApiError::Validation(
            "at least one of seats or autoRenew is required".to_string(),
        ));
    }

    let updated = state
        .billing
        .subscriptions
        .update_terms(id, body.seats, body.auto_renew)
        .await?;
    Ok(envelope(updated))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let detail = state.billing.subscriptions.detail(id, 10).await?;
    Ok(envelope(detail))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let canceled = state.billing.subscriptions.cancel(id).await?;
    Ok(envelope(canceled))
}
