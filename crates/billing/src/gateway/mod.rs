//! Gateway adapters.
//!
//! One uniform contract over heterogeneous providers: Stripe's single-step
//! subscription checkout and Razorpay's order + payment-link two-step flow
//! both live behind [`GatewayAdapter::create_checkout`]. Which adapter a
//! process runs is a single configuration value.

mod razorpay;
mod stripe;

pub use razorpay::RazorpayGateway;
pub use stripe::StripeGateway;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatdesk_shared::GatewayKind;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::CanonicalEvent;
use crate::models::{Plan, Subscription};

/// Bounded timeout for all provider API calls.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub plan: Plan,
    pub seats: i32,
    pub tenant_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
    pub gateway: GatewayKind,
}

/// Outcome of a renewal charge attempt.
///
/// A transport failure or timeout is *not* a decline; it surfaces as
/// `BillingError::GatewayUnavailable` and the caller must treat the outcome
/// as unknown.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Succeeded,
    Declined { reason: String },
}

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Create a provider checkout session or payment link. Failures are
    /// always reported to the caller, never silently defaulted.
    async fn create_checkout(&self, request: &CheckoutRequest) -> BillingResult<CheckoutSession>;

    /// Verify a webhook signature against the raw payload bytes.
    fn verify_signature(&self, payload: &[u8], signature_header: &str) -> bool;

    /// Map a provider webhook payload to a canonical event.
    fn translate_webhook(&self, payload: &[u8]) -> BillingResult<CanonicalEvent>;

    /// Charge the stored payment method for a renewal cycle.
    async fn charge_renewal(
        &self,
        subscription: &Subscription,
        amount: i64,
    ) -> BillingResult<ChargeOutcome>;
}

/// Build the adapter selected by configuration.
pub fn build_gateway(config: &GatewayConfig) -> BillingResult<Arc<dyn GatewayAdapter>> {
    match config.provider {
        GatewayKind::Stripe => {
            let stripe = config
                .stripe
                .clone()
                .ok_or_else(|| BillingError::Config("stripe selected but not configured".into()))?;
            Ok(Arc::new(StripeGateway::new(stripe)?))
        }
        GatewayKind::Razorpay => {
            let razorpay = config.razorpay.clone().ok_or_else(|| {
                BillingError::Config("razorpay selected but not configured".into())
            })?;
            Ok(Arc::new(RazorpayGateway::new(razorpay)?))
        }
    }
}

pub(crate) fn http_client() -> BillingResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(GATEWAY_TIMEOUT)
        .build()
        .map_err(|e| BillingError::Config(format!("failed to build HTTP client: {e}")))
}

/// Map a reqwest transport error onto the billing taxonomy. Timeouts and
/// connection failures are "gateway unavailable" (unknown outcome).
pub(crate) fn map_transport_error(err: reqwest::Error) -> BillingError {
    if err.is_timeout() || err.is_connect() {
        BillingError::GatewayUnavailable(err.to_string())
    } else {
        BillingError::Gateway(err.to_string())
    }
}
