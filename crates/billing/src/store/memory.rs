//! In-memory store backing demo mode and tests.
//!
//! A single `RwLock` over the whole dataset gives `commit_transition` its
//! atomicity: every multi-row write happens under one write guard.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chatdesk_shared::{GatewayKind, InvoiceStatus};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{Invoice, Plan, Subscription};
use crate::store::{BillingStore, ProcessedEvent, TransitionCommit};

#[derive(Default)]
struct Inner {
    plans: HashMap<String, Plan>,
    subscriptions: HashMap<Uuid, Subscription>,
    invoices: Vec<Invoice>,
    processed_events: HashSet<(GatewayKind, String)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn check_event_unprocessed(&self, event: &ProcessedEvent) -> BillingResult<()> {
        let key = (event.gateway, event.provider_event_id.clone());
        if self.processed_events.contains(&key) {
            return Err(BillingError::Invariant(format!(
                "event {} already processed",
                event.provider_event_id
            )));
        }
        Ok(())
    }

    fn record_event(&mut self, event: &ProcessedEvent) {
        self.processed_events
            .insert((event.gateway, event.provider_event_id.clone()));
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn list_plans(&self) -> BillingResult<Vec<Plan>> {
        let inner = self.inner.read().await;
        let mut plans: Vec<Plan> = inner.plans.values().cloned().collect();
        plans.sort_by_key(|p| p.price_monthly);
        Ok(plans)
    }

    async fn get_plan(&self, plan_id: &str) -> BillingResult<Option<Plan>> {
        Ok(self.inner.read().await.plans.get(plan_id).cloned())
    }

    async fn seed_plans(&self, plans: &[Plan]) -> BillingResult<()> {
        let mut inner = self.inner.write().await;
        for plan in plans {
            inner.plans.insert(plan.id.clone(), plan.clone());
        }
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.inner.read().await.subscriptions.get(&id).cloned())
    }

    async fn find_by_gateway_subscription(
        &self,
        gateway: GatewayKind,
        reference: &str,
    ) -> BillingResult<Option<Subscription>> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .values()
            .find(|s| {
                s.gateway == gateway && s.gateway_subscription.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn due_for_renewal(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        let inner = self.inner.read().await;
        let mut due: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.auto_renew && s.status.is_renewable() && s.current_period_end < now)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.current_period_end);
        Ok(due)
    }

    async fn invoices_for_subscription(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<Invoice>> {
        let inner = self.inner.read().await;
        let mut invoices: Vec<Invoice> = inner
            .invoices
            .iter()
            .filter(|i| i.subscription_id == subscription_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        invoices.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(invoices)
    }

    async fn is_event_processed(
        &self,
        gateway: GatewayKind,
        provider_event_id: &str,
    ) -> BillingResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .processed_events
            .contains(&(gateway, provider_event_id.to_string())))
    }

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
        processed_event: Option<&ProcessedEvent>,
    ) -> BillingResult<()> {
        let mut inner = self.inner.write().await;

        if let Some(event) = processed_event {
            inner.check_event_unprocessed(event)?;
        }
        if inner.subscriptions.contains_key(&subscription.id) {
            return Err(BillingError::Invariant(format!(
                "subscription {} already exists",
                subscription.id
            )));
        }

        inner
            .subscriptions
            .insert(subscription.id, subscription.clone());
        if let Some(event) = processed_event {
            inner.record_event(event);
        }
        Ok(())
    }

    async fn commit_transition(
        &self,
        commit: TransitionCommit<'_>,
    ) -> BillingResult<Option<Invoice>> {
        let mut inner = self.inner.write().await;

        // Validate every part before mutating anything; the guard makes the
        // whole block atomic with respect to other callers.
        if let Some(event) = commit.processed_event {
            inner.check_event_unprocessed(event)?;
        }

        if !inner.subscriptions.contains_key(&commit.subscription.id) {
            return Err(BillingError::NotFound(format!(
                "subscription {}",
                commit.subscription.id
            )));
        }

        if let Some(new_invoice) = commit.invoice {
            let duplicate_paid = new_invoice.status == InvoiceStatus::Paid
                && inner.invoices.iter().any(|i| {
                    i.subscription_id == new_invoice.subscription_id
                        && i.period_start == new_invoice.period_start
                        && i.status == InvoiceStatus::Paid
                });
            if duplicate_paid {
                return Err(BillingError::Invariant(format!(
                    "paid invoice already ledgered for subscription {} cycle {}",
                    new_invoice.subscription_id, new_invoice.period_start
                )));
            }
        }

        inner
            .subscriptions
            .insert(commit.subscription.id, commit.subscription.clone());

        let appended = commit.invoice.map(|n| {
            let invoice = n.clone().into_invoice();
            inner.invoices.push(invoice.clone());
            invoice
        });

        if let Some(event) = commit.processed_event {
            inner.record_event(event);
        }

        Ok(appended)
    }
}
