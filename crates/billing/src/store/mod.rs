//! Persistence port for the billing core.
//!
//! The state machine depends only on this trait; a transactional datastore
//! swaps in behind it without changing any transition logic. Two
//! implementations ship: [`PgStore`] (Postgres via sqlx) and [`MemoryStore`]
//! (demo mode and tests).

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chatdesk_shared::GatewayKind;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{Invoice, NewInvoice, Plan, Subscription};

/// A processed-event ledger entry, recorded atomically with the transition
/// it authorizes.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub gateway: GatewayKind,
    pub provider_event_id: String,
    pub outcome: String,
}

impl ProcessedEvent {
    pub fn new(gateway: GatewayKind, provider_event_id: &str, outcome: &str) -> Self {
        Self {
            gateway,
            provider_event_id: provider_event_id.to_string(),
            outcome: outcome.to_string(),
        }
    }
}

/// One atomic state-machine transition: the updated subscription fields, an
/// optional ledger append, and an optional processed-event record. An
/// implementation must apply all parts or none.
#[derive(Debug)]
pub struct TransitionCommit<'a> {
    pub subscription: &'a Subscription,
    pub invoice: Option<&'a NewInvoice>,
    pub processed_event: Option<&'a ProcessedEvent>,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    // Plan catalog
    async fn list_plans(&self) -> BillingResult<Vec<Plan>>;
    async fn get_plan(&self, plan_id: &str) -> BillingResult<Option<Plan>>;
    async fn seed_plans(&self, plans: &[Plan]) -> BillingResult<()>;

    // Subscriptions (reads; writes go through the state machine)
    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>>;
    async fn find_by_gateway_subscription(
        &self,
        gateway: GatewayKind,
        reference: &str,
    ) -> BillingResult<Option<Subscription>>;

    /// Subscriptions whose period has elapsed, with renewable status and
    /// auto-renew enabled. `auto_renew = false` rows are never returned.
    async fn due_for_renewal(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>>;

    // Invoice ledger (append happens inside commit_transition)
    async fn invoices_for_subscription(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<Invoice>>;

    // Processed-event ledger
    async fn is_event_processed(
        &self,
        gateway: GatewayKind,
        provider_event_id: &str,
    ) -> BillingResult<bool>;

    /// Create a subscription, optionally recording the webhook event that
    /// authorized it in the same atomic unit.
    async fn insert_subscription(
        &self,
        subscription: &Subscription,
        processed_event: Option<&ProcessedEvent>,
    ) -> BillingResult<()>;

    /// Apply a state-machine transition atomically. Returns the appended
    /// invoice, if any.
    ///
    /// Must fail with `InvariantViolation` semantics (and no partial effect)
    /// if the processed-event id already exists or if a `paid` invoice
    /// already covers the same billing cycle.
    async fn commit_transition(
        &self,
        commit: TransitionCommit<'_>,
    ) -> BillingResult<Option<Invoice>>;
}
