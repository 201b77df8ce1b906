//! Checkout orchestration.

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CheckoutRequest, CheckoutSession, GatewayAdapter};
use crate::store::BillingStore;

pub struct CheckoutService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn GatewayAdapter>,
    frontend_url: String,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn GatewayAdapter>,
        frontend_url: String,
    ) -> Self {
        Self {
            store,
            gateway,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        }
    }

    /// Pre-validate against the plan's seat limit, then create a provider
    /// checkout session. Gateway failures are always reported to the
    /// caller; a retryable `GatewayUnavailable` surfaces as such.
    pub async fn create_session(
        &self,
        plan_id: &str,
        seats: i32,
        tenant_id: &str,
    ) -> BillingResult<CheckoutSession> {
        if tenant_id.trim().is_empty() {
            return Err(BillingError::Validation("tenantId is required".to_string()));
        }
        if seats < 1 {
            return Err(BillingError::Validation(
                "seats must be at least 1".to_string(),
            ));
        }

        let plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("plan {plan_id}")))?;

        if seats > plan.seat_limit {
            return Err(BillingError::Validation(format!(
                "seats exceed plan limit of {}",
                plan.seat_limit
            )));
        }

        let request = CheckoutRequest {
            plan,
            seats,
            tenant_id: tenant_id.to_string(),
            success_url: format!(
                "{}/payments/success?session_id={{CHECKOUT_SESSION_ID}}",
                self.frontend_url
            ),
            cancel_url: format!("{}/payments/cancel", self.frontend_url),
        };

        let session = self.gateway.create_checkout(&request).await?;
        tracing::info!(
            session_id = %session.id,
            gateway = %session.gateway,
            plan_id = plan_id,
            seats = seats,
            tenant_id = tenant_id,
            "Checkout session created"
        );
        Ok(session)
    }
}
