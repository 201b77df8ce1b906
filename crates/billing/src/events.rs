//! Canonical webhook events.
//!
//! The gateway adapters translate provider-specific payloads into this
//! gateway-agnostic representation; the state machine never sees raw
//! provider JSON.

use chatdesk_shared::GatewayKind;

/// A verified, translated provider webhook.
#[derive(Debug, Clone)]
pub struct CanonicalEvent {
    /// Provider-assigned event id, used for at-most-once processing.
    pub provider_event_id: String,
    pub gateway: GatewayKind,
    pub kind: CanonicalEventKind,
}

#[derive(Debug, Clone)]
pub enum CanonicalEventKind {
    /// First payment completed; creates the subscription.
    CheckoutCompleted(CheckoutCompleted),
    /// A renewal charge succeeded for an existing subscription.
    PaymentSucceeded { gateway_subscription: String },
    /// A renewal charge failed for an existing subscription.
    PaymentFailed { gateway_subscription: String },
    /// The provider canceled the subscription.
    SubscriptionCanceled { gateway_subscription: String },
    /// An event type this integration does not care about. Acknowledged,
    /// never an error; payment providers send many of these.
    Ignored { event_type: String },
}

/// Checkout metadata echoed back by the provider.
#[derive(Debug, Clone)]
pub struct CheckoutCompleted {
    pub plan_id: String,
    pub seats: i32,
    pub tenant_id: String,
    pub gateway_customer: Option<String>,
    pub gateway_subscription: Option<String>,
}
