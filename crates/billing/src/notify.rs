//! Tenant notification seam.
//!
//! The console sends payment notifications over its messaging channel; the
//! billing core only defines the seam. Notification failures never abort a
//! transition, so the trait methods are infallible and implementations log
//! their own errors.

use async_trait::async_trait;

use crate::models::Subscription;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A renewal charge went through.
    async fn payment_succeeded(&self, subscription: &Subscription, amount: i64);

    /// A renewal charge failed; the tenant should see an actionable retry /
    /// cancellation-risk message, not a silent status change.
    async fn payment_failed(&self, subscription: &Subscription, amount: i64, retries_left: u32);

    async fn subscription_canceled(&self, subscription: &Subscription);
}

/// Default notifier: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn payment_succeeded(&self, subscription: &Subscription, amount: i64) {
        tracing::info!(
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            amount = amount,
            "Payment confirmation notification"
        );
    }

    async fn payment_failed(&self, subscription: &Subscription, amount: i64, retries_left: u32) {
        tracing::warn!(
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            amount = amount,
            retries_left = retries_left,
            "Payment failure notification"
        );
    }

    async fn subscription_canceled(&self, subscription: &Subscription) {
        tracing::info!(
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            "Cancellation notification"
        );
    }
}
