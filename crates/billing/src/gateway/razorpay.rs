//! Razorpay adapter.
//!
//! Checkout is a two-step flow (create order, then a payment link that
//! references it); both calls stay internal to this adapter so callers see
//! the same single `create_checkout` contract as Stripe.
//!
//! Razorpay webhook bodies carry no top-level event id, so the dedup key is
//! derived as `"{event}:{entity id}"`, which is stable across provider
//! redeliveries of the same event.

use async_trait::async_trait;
use chatdesk_shared::GatewayKind;
use serde::Deserialize;
use serde_json::json;

use crate::config::RazorpayConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{CanonicalEvent, CanonicalEventKind, CheckoutCompleted};
use crate::gateway::{
    http_client, map_transport_error, ChargeOutcome, CheckoutRequest, CheckoutSession,
    GatewayAdapter,
};
use crate::models::Subscription;
use crate::signature;

pub struct RazorpayGateway {
    config: RazorpayConfig,
    client: reqwest::Client,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> BillingResult<Self> {
        Ok(Self {
            config,
            client: http_client()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RazorpayOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayPaymentLinkResponse {
    short_url: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayWebhookBody {
    event: String,
    payload: serde_json::Value,
}

fn entity<'a>(payload: &'a serde_json::Value, name: &str) -> Option<&'a serde_json::Value> {
    payload.get(name).and_then(|v| v.get("entity"))
}

fn entity_str(payload: &serde_json::Value, name: &str, field: &str) -> Option<String> {
    entity(payload, name)
        .and_then(|e| e.get(field))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

async fn read_error(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) if !body.is_empty() => format!("HTTP {status}: {body}"),
        _ => format!("HTTP {status}"),
    }
}

#[async_trait]
impl GatewayAdapter for RazorpayGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Razorpay
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> BillingResult<CheckoutSession> {
        let amount = i64::from(request.seats) * request.plan.price_monthly;
        let notes = json!({
            "plan_id": request.plan.id,
            "seats": request.seats.to_string(),
            "tenant_id": request.tenant_id,
        });

        // Step 1: create the order.
        let order_body = json!({
            "amount": amount,
            "currency": "INR",
            "receipt": format!("{}_{}", request.plan.id, request.tenant_id),
            "notes": notes,
        });

        let order_response = self
            .client
            .post(format!("{}/v1/orders", self.config.api_base))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&order_body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !order_response.status().is_success() {
            let message = read_error(order_response).await;
            return Err(BillingError::Gateway(format!(
                "order creation failed: {message}"
            )));
        }

        let order: RazorpayOrderResponse =
            order_response.json().await.map_err(map_transport_error)?;

        // Step 2: create a payment link referencing the order.
        let link_body = json!({
            "reference_id": order.id,
            "amount": order.amount,
            "currency": order.currency,
            "description": format!("{} plan - {} seats", request.plan.name, request.seats),
            "callback_url": request.success_url,
            "callback_method": "get",
            "notes": notes,
        });

        let link_response = self
            .client
            .post(format!("{}/v1/payment_links", self.config.api_base))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&link_body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !link_response.status().is_success() {
            let message = read_error(link_response).await;
            return Err(BillingError::Gateway(format!(
                "payment link creation failed: {message}"
            )));
        }

        let link: RazorpayPaymentLinkResponse =
            link_response.json().await.map_err(map_transport_error)?;

        Ok(CheckoutSession {
            id: order.id,
            url: link.short_url,
            gateway: GatewayKind::Razorpay,
        })
    }

    fn verify_signature(&self, payload: &[u8], signature_header: &str) -> bool {
        signature::verify_hmac_hex(payload, signature_header, &self.config.webhook_secret)
    }

    fn translate_webhook(&self, payload: &[u8]) -> BillingResult<CanonicalEvent> {
        let body: RazorpayWebhookBody = serde_json::from_slice(payload)?;
        let entities = &body.payload;

        let (kind, entity_id) = match body.event.as_str() {
            "payment.captured" => {
                let payment = entity(entities, "payment")
                    .ok_or_else(|| BillingError::Payload("missing payment entity".into()))?;
                let payment_id = payment
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BillingError::Payload("missing payment id".into()))?
                    .to_string();
                let notes = payment
                    .get("notes")
                    .ok_or_else(|| BillingError::Payload("missing payment notes".into()))?;
                let seats: i32 = notes
                    .get("seats")
                    .and_then(|v| v.as_str())
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| BillingError::Payload("seats is not an integer".into()))?;
                let field = |name: &str| -> BillingResult<String> {
                    notes
                        .get(name)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .ok_or_else(|| BillingError::Payload(format!("missing note {name}")))
                };

                let kind = CanonicalEventKind::CheckoutCompleted(CheckoutCompleted {
                    plan_id: field("plan_id")?,
                    seats,
                    tenant_id: field("tenant_id")?,
                    gateway_customer: payment
                        .get("customer_id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    gateway_subscription: payment
                        .get("order_id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                });
                (kind, payment_id)
            }
            "subscription.charged" => {
                let sub_id = entity_str(entities, "subscription", "id")
                    .ok_or_else(|| BillingError::Payload("missing subscription entity".into()))?;
                (
                    CanonicalEventKind::PaymentSucceeded {
                        gateway_subscription: sub_id.clone(),
                    },
                    sub_id,
                )
            }
            "payment.failed" => {
                // Renewal failures arrive as payment.failed with the order
                // reference the subscription was created from.
                let reference = entity_str(entities, "subscription", "id")
                    .or_else(|| entity_str(entities, "payment", "order_id"))
                    .ok_or_else(|| {
                        BillingError::Payload("missing subscription/order reference".into())
                    })?;
                let payment_id = entity_str(entities, "payment", "id").unwrap_or_else(|| reference.clone());
                (
                    CanonicalEventKind::PaymentFailed {
                        gateway_subscription: reference,
                    },
                    payment_id,
                )
            }
            "subscription.cancelled" => {
                let sub_id = entity_str(entities, "subscription", "id")
                    .ok_or_else(|| BillingError::Payload("missing subscription entity".into()))?;
                (
                    CanonicalEventKind::SubscriptionCanceled {
                        gateway_subscription: sub_id.clone(),
                    },
                    sub_id,
                )
            }
            other => (
                CanonicalEventKind::Ignored {
                    event_type: other.to_string(),
                },
                String::new(),
            ),
        };

        Ok(CanonicalEvent {
            provider_event_id: format!("{}:{}", body.event, entity_id),
            gateway: GatewayKind::Razorpay,
            kind,
        })
    }

    async fn charge_renewal(
        &self,
        subscription: &Subscription,
        amount: i64,
    ) -> BillingResult<ChargeOutcome> {
        let Some(customer) = subscription.gateway_customer.as_deref() else {
            return Ok(ChargeOutcome::Declined {
                reason: "no stored payment method".to_string(),
            });
        };

        let body = json!({
            "amount": amount,
            "currency": "INR",
            "customer_id": customer,
            "order_id": subscription.gateway_subscription,
            "recurring": "1",
            "description": format!("Subscription renewal {}", subscription.id),
        });

        let response = self
            .client
            .post(format!(
                "{}/v1/payments/create/recurring",
                self.config.api_base
            ))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(ChargeOutcome::Succeeded);
        }
        if status.is_server_error() {
            return Err(BillingError::GatewayUnavailable(format!(
                "razorpay returned {status}"
            )));
        }

        let message = read_error(response).await;
        Ok(ChargeOutcome::Declined { reason: message })
    }
}
