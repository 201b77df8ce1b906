//! Webhook ingestion pipeline.
//!
//! Flow for every delivery: verify the signature against the raw body,
//! translate the provider payload into a canonical event, then hand the
//! event to the subscription state machine. Verification failures stop
//! processing before any state is touched.

use std::sync::Arc;

use chatdesk_shared::GatewayKind;

use crate::error::{BillingError, BillingResult};
use crate::events::CanonicalEventKind;
use crate::gateway::GatewayAdapter;
use crate::subscriptions::SubscriptionService;

pub struct WebhookPipeline {
    gateway: Arc<dyn GatewayAdapter>,
    subscriptions: Arc<SubscriptionService>,
}

impl WebhookPipeline {
    pub fn new(gateway: Arc<dyn GatewayAdapter>, subscriptions: Arc<SubscriptionService>) -> Self {
        Self {
            gateway,
            subscriptions,
        }
    }

    /// Process a raw webhook delivery addressed to `kind`.
    ///
    /// The path segment must match the configured gateway; a delivery for
    /// the other provider is rejected without signature checks since we
    /// hold no secret for it.
    pub async fn ingest(
        &self,
        kind: GatewayKind,
        payload: &[u8],
        signature: Option<&str>,
    ) -> BillingResult<()> {
        if kind != self.gateway.kind() {
            return Err(BillingError::Validation(format!(
                "webhooks for {kind} are not enabled"
            )));
        }

        let signature = signature.ok_or(BillingError::SignatureInvalid)?;
        if !self.gateway.verify_signature(payload, signature) {
            tracing::warn!(
                gateway = %kind,
                payload_len = payload.len(),
                "Webhook rejected: signature verification failed"
            );
            return Err(BillingError::SignatureInvalid);
        }

        let event = self.gateway.translate_webhook(payload)?;

        if let CanonicalEventKind::Ignored { event_type } = &event.kind {
            tracing::debug!(
                gateway = %kind,
                event_type = event_type.as_str(),
                "Ignoring webhook event type"
            );
            return Ok(());
        }

        tracing::info!(
            gateway = %kind,
            event_id = event.provider_event_id.as_str(),
            "Processing webhook event"
        );
        self.subscriptions.apply_event(&event).await
    }
}
