//! Renewal sweep.
//!
//! Finds subscriptions whose paid period has lapsed, charges each one
//! through the gateway, and records the outcome via the state machine.
//! Items are fully isolated: one bad subscription never aborts the
//! sweep, and a charge whose outcome is unknown (timeout, 5xx) is
//! deferred untouched so the next sweep retries it.

use std::sync::Arc;

use chatdesk_shared::SubscriptionStatus;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::gateway::GatewayAdapter;
use crate::models::Subscription;
use crate::store::BillingStore;
use crate::subscriptions::SubscriptionService;

#[derive(Debug, Default, Clone)]
pub struct SweepSummary {
    pub processed: usize,
    pub renewed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub errors: usize,
}

pub struct RenewalService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn GatewayAdapter>,
    subscriptions: Arc<SubscriptionService>,
}

impl RenewalService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn GatewayAdapter>,
        subscriptions: Arc<SubscriptionService>,
    ) -> Self {
        Self {
            store,
            gateway,
            subscriptions,
        }
    }

    /// One full pass over everything currently due. The due query already
    /// excludes auto_renew=false and non-renewable statuses.
    pub async fn run_sweep(&self) -> BillingResult<SweepSummary> {
        let now = OffsetDateTime::now_utc();
        let due = self.store.due_for_renewal(now).await?;
        let mut summary = SweepSummary::default();

        tracing::info!(due = due.len(), "Starting renewal sweep");

        for subscription in due {
            summary.processed += 1;
            match self.renew_one(&subscription).await {
                Ok(SweepItem::Renewed) => summary.renewed += 1,
                Ok(SweepItem::Failed) => summary.failed += 1,
                Ok(SweepItem::Deferred) => summary.deferred += 1,
                Err(err) => {
                    summary.errors += 1;
                    tracing::error!(
                        subscription_id = %subscription.id,
                        error = %err,
                        "Renewal failed with unexpected error"
                    );
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            renewed = summary.renewed,
            failed = summary.failed,
            deferred = summary.deferred,
            errors = summary.errors,
            "Renewal sweep complete"
        );
        Ok(summary)
    }

    async fn renew_one(&self, subscription: &Subscription) -> BillingResult<SweepItem> {
        let plan = self
            .store
            .get_plan(&subscription.plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("plan {}", subscription.plan_id)))?;
        let amount = subscription.cycle_amount(&plan);

        match self.gateway.charge_renewal(subscription, amount).await {
            Ok(outcome) => {
                let updated = self
                    .subscriptions
                    .record_charge_outcome(subscription.id, &outcome)
                    .await?;
                if updated.status == SubscriptionStatus::Active {
                    Ok(SweepItem::Renewed)
                } else {
                    Ok(SweepItem::Failed)
                }
            }
            // Unknown outcome: the charge may or may not have landed.
            // No transition is recorded; the next sweep picks it up again.
            Err(err @ BillingError::GatewayUnavailable(_)) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    error = %err,
                    "Gateway unavailable during renewal charge - deferring"
                );
                Ok(SweepItem::Deferred)
            }
            Err(err) => Err(err),
        }
    }
}

enum SweepItem {
    Renewed,
    Failed,
    Deferred,
}
