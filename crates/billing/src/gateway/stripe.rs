//! Stripe adapter.
//!
//! Talks to the Stripe REST API directly with form-encoded requests. The
//! adapter owns the translation from Stripe's event vocabulary to canonical
//! events; nothing Stripe-specific escapes this module.

use async_trait::async_trait;
use chatdesk_shared::GatewayKind;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::config::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{CanonicalEvent, CanonicalEventKind, CheckoutCompleted};
use crate::gateway::{
    http_client, map_transport_error, ChargeOutcome, CheckoutRequest, CheckoutSession,
    GatewayAdapter,
};
use crate::models::Subscription;
use crate::signature;

pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> BillingResult<Self> {
        Ok(Self {
            config,
            client: http_client()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntentResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: String,
}

fn require_str(object: &serde_json::Value, field: &str) -> BillingResult<String> {
    object
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| BillingError::Payload(format!("missing field {field}")))
}

#[async_trait]
impl GatewayAdapter for StripeGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Stripe
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> BillingResult<CheckoutSession> {
        let unit_amount = i64::from(request.seats) * request.plan.price_monthly;
        let product_name = format!("{} plan - {} seats", request.plan.name, request.seats);

        let params: Vec<(&str, String)> = vec![
            ("mode", "subscription".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", "usd".to_string()),
            (
                "line_items[0][price_data][unit_amount]",
                unit_amount.to_string(),
            ),
            (
                "line_items[0][price_data][recurring][interval]",
                "month".to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                product_name,
            ),
            ("metadata[plan_id]", request.plan.id.clone()),
            ("metadata[seats]", request.seats.to_string()),
            ("metadata[tenant_id]", request.tenant_id.clone()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.config.api_base))
            .bearer_auth(&self.config.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let message = read_stripe_error(response).await;
            return Err(BillingError::Gateway(format!(
                "checkout session creation failed: {message}"
            )));
        }

        let session: StripeCheckoutSessionResponse =
            response.json().await.map_err(map_transport_error)?;
        let url = session
            .url
            .ok_or_else(|| BillingError::Gateway("checkout session has no URL".into()))?;

        Ok(CheckoutSession {
            id: session.id,
            url,
            gateway: GatewayKind::Stripe,
        })
    }

    fn verify_signature(&self, payload: &[u8], signature_header: &str) -> bool {
        signature::verify_stripe_header(
            payload,
            signature_header,
            &self.config.webhook_secret,
            OffsetDateTime::now_utc().unix_timestamp(),
        )
    }

    fn translate_webhook(&self, payload: &[u8]) -> BillingResult<CanonicalEvent> {
        let event: StripeEvent = serde_json::from_slice(payload)?;
        let object = &event.data.object;

        let kind = match event.event_type.as_str() {
            "checkout.session.completed" => {
                let metadata = object
                    .get("metadata")
                    .ok_or_else(|| BillingError::Payload("missing checkout metadata".into()))?;
                let seats: i32 = require_str(metadata, "seats")?
                    .parse()
                    .map_err(|_| BillingError::Payload("seats is not an integer".into()))?;

                CanonicalEventKind::CheckoutCompleted(CheckoutCompleted {
                    plan_id: require_str(metadata, "plan_id")?,
                    seats,
                    tenant_id: require_str(metadata, "tenant_id")?,
                    gateway_customer: object
                        .get("customer")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    gateway_subscription: object
                        .get("subscription")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                })
            }
            "invoice.payment_succeeded" | "invoice.paid" => CanonicalEventKind::PaymentSucceeded {
                gateway_subscription: require_str(object, "subscription")?,
            },
            "invoice.payment_failed" => CanonicalEventKind::PaymentFailed {
                gateway_subscription: require_str(object, "subscription")?,
            },
            "customer.subscription.deleted" => CanonicalEventKind::SubscriptionCanceled {
                gateway_subscription: require_str(object, "id")?,
            },
            other => CanonicalEventKind::Ignored {
                event_type: other.to_string(),
            },
        };

        Ok(CanonicalEvent {
            provider_event_id: event.id,
            gateway: GatewayKind::Stripe,
            kind,
        })
    }

    async fn charge_renewal(
        &self,
        subscription: &Subscription,
        amount: i64,
    ) -> BillingResult<ChargeOutcome> {
        let Some(customer) = subscription.gateway_customer.as_deref() else {
            // Nothing on file to charge; treated as a decline so the
            // subscription enters dunning rather than staying silently due.
            return Ok(ChargeOutcome::Declined {
                reason: "no stored payment method".to_string(),
            });
        };

        let params: Vec<(&str, String)> = vec![
            ("amount", amount.to_string()),
            ("currency", "usd".to_string()),
            ("customer", customer.to_string()),
            ("confirm", "true".to_string()),
            ("off_session", "true".to_string()),
            (
                "description",
                format!("Subscription renewal {}", subscription.id),
            ),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.config.api_base))
            .bearer_auth(&self.config.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            let intent: StripePaymentIntentResponse =
                response.json().await.map_err(map_transport_error)?;
            if intent.status == "succeeded" {
                return Ok(ChargeOutcome::Succeeded);
            }
            return Ok(ChargeOutcome::Declined {
                reason: format!("payment intent status {}", intent.status),
            });
        }

        // 402 is a card decline; anything else from the API is a provider
        // error the sweep should not interpret as a decline.
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            let message = read_stripe_error(response).await;
            return Ok(ChargeOutcome::Declined { reason: message });
        }

        if status.is_server_error() {
            return Err(BillingError::GatewayUnavailable(format!(
                "stripe returned {status}"
            )));
        }

        let message = read_stripe_error(response).await;
        Err(BillingError::Gateway(message))
    }
}

async fn read_stripe_error(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<StripeErrorBody>().await {
        Ok(body) if !body.error.message.is_empty() => body.error.message,
        _ => format!("HTTP {status}"),
    }
}
