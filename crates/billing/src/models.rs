//! Billing domain entities.
//!
//! `Subscription` is owned exclusively by the state machine in
//! [`crate::subscriptions`]; every mutation flows through its atomic
//! transition boundary. `Invoice` rows are append-only.

use chatdesk_shared::{GatewayKind, InvoiceStatus, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Immutable catalog entry. Price is per seat per month in minor currency
/// units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price_monthly: i64,
    pub seat_limit: i32,
}

/// The central mutable entity of the billing core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: String,
    pub plan_id: String,
    pub seats: i32,
    pub status: SubscriptionStatus,
    pub gateway: GatewayKind,
    pub gateway_customer: Option<String>,
    pub gateway_subscription: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    pub auto_renew: bool,
    /// Consecutive failed renewal charges since the last successful one.
    /// Reset on success; cancellation when the dunning budget is exhausted.
    pub renewal_attempts: i32,
}

impl Subscription {
    /// Amount to charge for one billing cycle at the current seat count.
    ///
    /// Computed at attempt time so historical invoices stay correct if the
    /// seat count or plan changes later.
    pub fn cycle_amount(&self, plan: &Plan) -> i64 {
        i64::from(self.seats) * plan.price_monthly
    }
}

/// A ledgered billing attempt. Never updated or deleted once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub amount: i64,
    pub status: InvoiceStatus,
    /// Start of the billing cycle this attempt covers. At most one `paid`
    /// invoice may exist per (subscription, period_start).
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    pub pdf_url: Option<String>,
}

/// Invoice to append; the ledger assigns the id.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub subscription_id: Uuid,
    pub amount: i64,
    pub status: InvoiceStatus,
    pub period_start: OffsetDateTime,
    pub issued_at: OffsetDateTime,
}

impl NewInvoice {
    pub fn into_invoice(self) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            subscription_id: self.subscription_id,
            amount: self.amount,
            status: self.status,
            period_start: self.period_start,
            issued_at: self.issued_at,
            pdf_url: None,
        }
    }
}
