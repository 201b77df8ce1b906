//! Subscription state machine.
//!
//! Owns every subscription mutation. Each transition (status change plus its
//! invoice append plus the processed-event record) goes through the store's
//! atomic commit; a partially applied transition is the primary hazard this
//! module exists to prevent.
//!
//! Transitions for a single subscription are serialized with a
//! per-subscription async mutex held across the ledger check, the
//! transition, and the ledger insert, so a webhook delivery racing a
//! scheduler sweep cannot interleave.

use std::collections::HashMap;
use std::sync::Arc;

use chatdesk_shared::{InvoiceStatus, SubscriptionStatus};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{CanonicalEvent, CanonicalEventKind, CheckoutCompleted};
use crate::gateway::ChargeOutcome;
use crate::models::{Invoice, NewInvoice, Plan, Subscription};
use crate::notify::Notifier;
use crate::period::add_one_month;
use crate::store::{BillingStore, ProcessedEvent, TransitionCommit};

/// Dunning policy: how many consecutive failed renewal charges a
/// subscription survives before cancellation.
#[derive(Debug, Clone, Copy)]
pub struct DunningPolicy {
    pub max_attempts: u32,
}

impl Default for DunningPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl DunningPolicy {
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("DUNNING_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &u32| n >= 1)
            .unwrap_or(Self::default().max_attempts);
        Self { max_attempts }
    }
}

/// Subscription with its plan and recent invoices, for API reads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDetail {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub plan: Plan,
    pub invoices: Vec<Invoice>,
}

pub struct SubscriptionService {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn Notifier>,
    dunning: DunningPolicy,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn Notifier>,
        dunning: DunningPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            dunning,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Per-subscription mutual-exclusion scope.
    ///
    /// Entries whose `Arc` is held only by the registry have no holder or
    /// waiter left, so each acquisition sweeps them out. The map is bounded
    /// by the number of subscriptions locked at the same time.
    async fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Apply a verified canonical webhook event.
    ///
    /// Unknown subscriptions surface as `NotFound`; the resulting non-2xx
    /// response makes the provider redeliver, which also covers
    /// out-of-order delivery of a payment event before its checkout event.
    pub async fn apply_event(&self, event: &CanonicalEvent) -> BillingResult<()> {
        match &event.kind {
            CanonicalEventKind::Ignored { event_type } => {
                tracing::info!(
                    gateway = %event.gateway,
                    event_type = %event_type,
                    "Unhandled gateway event type - acknowledged without processing"
                );
                Ok(())
            }
            CanonicalEventKind::CheckoutCompleted(details) => {
                self.handle_checkout_completed(event, details).await
            }
            CanonicalEventKind::PaymentSucceeded {
                gateway_subscription,
            } => {
                let sub = self.resolve(event, gateway_subscription).await?;
                self.apply_renewal_success(sub.id, Some(processed(event, "payment_succeeded")))
                    .await?;
                Ok(())
            }
            CanonicalEventKind::PaymentFailed {
                gateway_subscription,
            } => {
                let sub = self.resolve(event, gateway_subscription).await?;
                self.apply_renewal_failure(
                    sub.id,
                    Some(processed(event, "payment_failed")),
                    "gateway reported payment failure",
                )
                .await?;
                Ok(())
            }
            CanonicalEventKind::SubscriptionCanceled {
                gateway_subscription,
            } => {
                let sub = self.resolve(event, gateway_subscription).await?;
                self.apply_cancellation(sub.id, Some(processed(event, "subscription_canceled")))
                    .await?;
                Ok(())
            }
        }
    }

    async fn resolve(
        &self,
        event: &CanonicalEvent,
        gateway_subscription: &str,
    ) -> BillingResult<Subscription> {
        self.store
            .find_by_gateway_subscription(event.gateway, gateway_subscription)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!(
                    "subscription for {} reference {}",
                    event.gateway, gateway_subscription
                ))
            })
    }

    /// Checkout completion creates the subscription: status `active` with
    /// the current moment as the billing anchor. The provider's first
    /// payment event then ledgers the paid invoice and advances the period.
    async fn handle_checkout_completed(
        &self,
        event: &CanonicalEvent,
        details: &CheckoutCompleted,
    ) -> BillingResult<()> {
        if self
            .store
            .is_event_processed(event.gateway, &event.provider_event_id)
            .await?
        {
            tracing::info!(
                event_id = %event.provider_event_id,
                "Duplicate checkout event - already processed"
            );
            return Ok(());
        }

        // A redelivery that raced a concurrent first delivery can reach
        // here; the gateway reference check keeps it from creating a twin.
        if let Some(reference) = details.gateway_subscription.as_deref() {
            if self
                .store
                .find_by_gateway_subscription(event.gateway, reference)
                .await?
                .is_some()
            {
                tracing::info!(
                    gateway_subscription = reference,
                    "Subscription already exists for checkout event"
                );
                return Ok(());
            }
        }

        let plan = self
            .store
            .get_plan(&details.plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("plan {}", details.plan_id)))?;
        validate_seats(details.seats, &plan)?;

        let subscription = Subscription {
            id: Uuid::new_v4(),
            tenant_id: details.tenant_id.clone(),
            plan_id: plan.id.clone(),
            seats: details.seats,
            status: SubscriptionStatus::Active,
            gateway: event.gateway,
            gateway_customer: details.gateway_customer.clone(),
            gateway_subscription: details.gateway_subscription.clone(),
            current_period_end: OffsetDateTime::now_utc(),
            auto_renew: true,
            renewal_attempts: 0,
        };

        self.store
            .insert_subscription(
                &subscription,
                Some(&processed(event, "subscription_created")),
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            plan_id = %subscription.plan_id,
            seats = subscription.seats,
            "Subscription created from completed checkout"
        );
        Ok(())
    }

    /// Successful renewal charge: append a `paid` invoice and advance
    /// `current_period_end` by exactly one month from its prior value,
    /// never from "now", so a late sweep cannot drift the anchor.
    pub async fn apply_renewal_success(
        &self,
        id: Uuid,
        event: Option<ProcessedEvent>,
    ) -> BillingResult<Subscription> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let sub = self.load(id).await?;
        if let Some(existing) = self.short_circuit(&sub, event.as_ref()).await? {
            return Ok(existing);
        }

        let plan = self.plan_of(&sub).await?;
        let amount = sub.cycle_amount(&plan);
        let cycle_start = sub.current_period_end;

        let mut updated = sub;
        updated.status = SubscriptionStatus::Active;
        updated.current_period_end = add_one_month(cycle_start);
        updated.renewal_attempts = 0;

        let invoice = NewInvoice {
            subscription_id: id,
            amount,
            status: InvoiceStatus::Paid,
            period_start: cycle_start,
            issued_at: OffsetDateTime::now_utc(),
        };

        self.store
            .commit_transition(TransitionCommit {
                subscription: &updated,
                invoice: Some(&invoice),
                processed_event: event.as_ref(),
            })
            .await?;

        tracing::info!(
            subscription_id = %id,
            amount = amount,
            period_end = %updated.current_period_end,
            "Renewal charge succeeded"
        );
        self.notifier.payment_succeeded(&updated, amount).await;
        Ok(updated)
    }

    /// Failed renewal charge: append a `failed` invoice, leave the period
    /// end unchanged, and move to `past_due` - or `canceled` once the
    /// dunning budget is exhausted.
    pub async fn apply_renewal_failure(
        &self,
        id: Uuid,
        event: Option<ProcessedEvent>,
        reason: &str,
    ) -> BillingResult<Subscription> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let sub = self.load(id).await?;
        if let Some(existing) = self.short_circuit(&sub, event.as_ref()).await? {
            return Ok(existing);
        }

        let plan = self.plan_of(&sub).await?;
        let amount = sub.cycle_amount(&plan);
        let attempts = sub.renewal_attempts.saturating_add(1);
        let max_attempts = i32::try_from(self.dunning.max_attempts).unwrap_or(i32::MAX);
        let exhausted = attempts >= max_attempts;

        let mut updated = sub;
        updated.status = if exhausted {
            SubscriptionStatus::Canceled
        } else {
            SubscriptionStatus::PastDue
        };
        updated.renewal_attempts = attempts;

        let invoice = NewInvoice {
            subscription_id: id,
            amount,
            status: InvoiceStatus::Failed,
            period_start: updated.current_period_end,
            issued_at: OffsetDateTime::now_utc(),
        };

        self.store
            .commit_transition(TransitionCommit {
                subscription: &updated,
                invoice: Some(&invoice),
                processed_event: event.as_ref(),
            })
            .await?;

        tracing::warn!(
            subscription_id = %id,
            amount = amount,
            attempts = attempts,
            exhausted = exhausted,
            reason = reason,
            "Renewal charge failed"
        );

        let retries_left = self
            .dunning
            .max_attempts
            .saturating_sub(u32::try_from(attempts).unwrap_or(u32::MAX));
        self.notifier
            .payment_failed(&updated, amount, retries_left)
            .await;
        if exhausted {
            self.notifier.subscription_canceled(&updated).await;
        }
        Ok(updated)
    }

    /// Provider-side or user cancellation. Idempotent; `canceled` is
    /// terminal.
    pub async fn apply_cancellation(
        &self,
        id: Uuid,
        event: Option<ProcessedEvent>,
    ) -> BillingResult<Subscription> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let sub = self.load(id).await?;
        if sub.status == SubscriptionStatus::Canceled {
            return Ok(sub);
        }
        if let Some(ev) = &event {
            if self
                .store
                .is_event_processed(ev.gateway, &ev.provider_event_id)
                .await?
            {
                return Ok(sub);
            }
        }

        let mut updated = sub;
        updated.status = SubscriptionStatus::Canceled;

        self.store
            .commit_transition(TransitionCommit {
                subscription: &updated,
                invoice: None,
                processed_event: event.as_ref(),
            })
            .await?;

        tracing::info!(subscription_id = %id, "Subscription canceled");
        self.notifier.subscription_canceled(&updated).await;
        Ok(updated)
    }

    /// Record the outcome of a scheduler-driven charge attempt.
    pub async fn record_charge_outcome(
        &self,
        id: Uuid,
        outcome: &ChargeOutcome,
    ) -> BillingResult<Subscription> {
        match outcome {
            ChargeOutcome::Succeeded => self.apply_renewal_success(id, None).await,
            ChargeOutcome::Declined { reason } => {
                self.apply_renewal_failure(id, None, reason).await
            }
        }
    }

    /// Update seats and/or auto-renew, independent of lifecycle status.
    /// Re-validates the seat-limit invariant server-side.
    pub async fn update_terms(
        &self,
        id: Uuid,
        seats: Option<i32>,
        auto_renew: Option<bool>,
    ) -> BillingResult<Subscription> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let sub = self.load(id).await?;
        let plan = self.plan_of(&sub).await?;

        let mut updated = sub;
        if let Some(seats) = seats {
            validate_seats(seats, &plan)?;
            updated.seats = seats;
        }
        if let Some(auto_renew) = auto_renew {
            updated.auto_renew = auto_renew;
        }

        self.store
            .commit_transition(TransitionCommit {
                subscription: &updated,
                invoice: None,
                processed_event: None,
            })
            .await?;
        Ok(updated)
    }

    /// Explicit user-requested cancellation, allowed from any state.
    pub async fn cancel(&self, id: Uuid) -> BillingResult<Subscription> {
        self.apply_cancellation(id, None).await
    }

    pub async fn get(&self, id: Uuid) -> BillingResult<Subscription> {
        self.load(id).await
    }

    /// Subscription with plan and the most recent invoices, newest first.
    pub async fn detail(&self, id: Uuid, invoice_limit: i64) -> BillingResult<SubscriptionDetail> {
        let subscription = self.load(id).await?;
        let plan = self.plan_of(&subscription).await?;
        let invoices = self
            .store
            .invoices_for_subscription(id, invoice_limit)
            .await?;
        Ok(SubscriptionDetail {
            subscription,
            plan,
            invoices,
        })
    }

    async fn load(&self, id: Uuid) -> BillingResult<Subscription> {
        self.store
            .get_subscription(id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("subscription {id}")))
    }

    async fn plan_of(&self, sub: &Subscription) -> BillingResult<Plan> {
        self.store
            .get_plan(&sub.plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("plan {}", sub.plan_id)))
    }

    /// Idempotency and terminal-state guard, checked inside the
    /// per-subscription lock. Returns the current subscription when the
    /// transition must not be applied.
    async fn short_circuit(
        &self,
        sub: &Subscription,
        event: Option<&ProcessedEvent>,
    ) -> BillingResult<Option<Subscription>> {
        if let Some(ev) = event {
            if self
                .store
                .is_event_processed(ev.gateway, &ev.provider_event_id)
                .await?
            {
                tracing::info!(
                    event_id = %ev.provider_event_id,
                    "Duplicate webhook event - no transition reapplied"
                );
                return Ok(Some(sub.clone()));
            }
        }
        if sub.status == SubscriptionStatus::Canceled {
            tracing::info!(
                subscription_id = %sub.id,
                "Charge event for canceled subscription - ignored"
            );
            return Ok(Some(sub.clone()));
        }
        Ok(None)
    }
}

fn processed(event: &CanonicalEvent, outcome: &str) -> ProcessedEvent {
    ProcessedEvent::new(event.gateway, &event.provider_event_id, outcome)
}

fn validate_seats(seats: i32, plan: &Plan) -> BillingResult<()> {
    if seats < 1 {
        return Err(BillingError::Validation(
            "seats must be at least 1".to_string(),
        ));
    }
    if seats > plan.seat_limit {
        return Err(BillingError::Validation(format!(
            "seats exceed plan limit of {}",
            plan.seat_limit
        )));
    }
    Ok(())
}
