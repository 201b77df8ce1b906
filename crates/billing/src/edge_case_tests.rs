// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Core
//!
//! Covers boundary conditions and race conditions in:
//! - Subscription state machine transitions
//! - Webhook idempotency and redelivery
//! - Renewal sweep isolation and deferral
//! - Checkout session creation against mock provider APIs
//! - Signature verification at the pipeline boundary

use std::sync::Arc;

use async_trait::async_trait;
use chatdesk_shared::{GatewayKind, InvoiceStatus, SubscriptionStatus};
use time::macros::datetime;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::seed_default_plans;
use crate::error::{BillingError, BillingResult};
use crate::events::{CanonicalEvent, CanonicalEventKind, CheckoutCompleted};
use crate::gateway::{ChargeOutcome, CheckoutRequest, CheckoutSession, GatewayAdapter};
use crate::models::Subscription;
use crate::notify::{LogNotifier, Notifier};
use crate::store::{BillingStore, MemoryStore};
use crate::subscriptions::{DunningPolicy, SubscriptionService};

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    seed_default_plans(store.as_ref()).await.unwrap();
    store
}

fn service(store: &Arc<MemoryStore>) -> Arc<SubscriptionService> {
    service_with(store, Arc::new(LogNotifier), DunningPolicy::default())
}

fn service_with(
    store: &Arc<MemoryStore>,
    notifier: Arc<dyn Notifier>,
    dunning: DunningPolicy,
) -> Arc<SubscriptionService> {
    Arc::new(SubscriptionService::new(store.clone(), notifier, dunning))
}

fn growth_subscription(seats: i32, period_end: OffsetDateTime) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        tenant_id: "tenant-acme".to_string(),
        plan_id: "plan_growth".to_string(),
        seats,
        status: SubscriptionStatus::Active,
        gateway: GatewayKind::Stripe,
        gateway_customer: Some("cus_123".to_string()),
        gateway_subscription: Some("sub_123".to_string()),
        current_period_end: period_end,
        auto_renew: true,
        renewal_attempts: 0,
    }
}

async fn insert(store: &MemoryStore, subscription: &Subscription) {
    store.insert_subscription(subscription, None).await.unwrap();
}

/// Notifier that records which notifications fired.
#[derive(Default)]
struct RecordingNotifier {
    events: tokio::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn payment_succeeded(&self, _subscription: &Subscription, amount: i64) {
        self.events.lock().await.push(format!("succeeded:{amount}"));
    }

    async fn payment_failed(&self, _subscription: &Subscription, amount: i64, retries_left: u32) {
        self.events
            .lock()
            .await
            .push(format!("failed:{amount}:{retries_left}"));
    }

    async fn subscription_canceled(&self, subscription: &Subscription) {
        self.events
            .lock()
            .await
            .push(format!("canceled:{}", subscription.id));
    }
}

mod state_machine_tests {
    use super::*;

    // Growth plan at 10 seats renews for exactly 10 x 9900 = 99000.
    #[tokio::test]
    async fn growth_plan_renewal_ledgers_seat_scaled_amount() {
        let store = seeded_store().await;
        let svc = service(&store);
        let anchor = datetime!(2026-08-01 00:00 UTC);
        let sub = growth_subscription(10, anchor);
        insert(&store, &sub).await;

        let updated = svc.apply_renewal_success(sub.id, None).await.unwrap();

        assert_eq!(updated.status, SubscriptionStatus::Active);
        assert_eq!(updated.current_period_end, datetime!(2026-09-01 00:00 UTC));

        let invoices = store.invoices_for_subscription(sub.id, 10).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].amount, 99_000);
        assert_eq!(invoices[0].status, InvoiceStatus::Paid);
        assert_eq!(invoices[0].period_start, anchor);
    }

    #[tokio::test]
    async fn failed_renewal_moves_to_past_due_without_advancing_period() {
        let store = seeded_store().await;
        let svc = service(&store);
        let anchor = datetime!(2026-08-01 00:00 UTC);
        let sub = growth_subscription(10, anchor);
        insert(&store, &sub).await;

        let updated = svc
            .apply_renewal_failure(sub.id, None, "card declined")
            .await
            .unwrap();

        assert_eq!(updated.status, SubscriptionStatus::PastDue);
        assert_eq!(updated.current_period_end, anchor, "period must not move");
        assert_eq!(updated.renewal_attempts, 1);

        let invoices = store.invoices_for_subscription(sub.id, 10).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].status, InvoiceStatus::Failed);
    }

    #[tokio::test]
    async fn dunning_exhaustion_cancels_and_notifies() {
        let store = seeded_store().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let svc = service_with(&store, notifier.clone(), DunningPolicy { max_attempts: 3 });
        let sub = growth_subscription(5, datetime!(2026-08-01 00:00 UTC));
        insert(&store, &sub).await;

        for _ in 0..2 {
            let updated = svc
                .apply_renewal_failure(sub.id, None, "card declined")
                .await
                .unwrap();
            assert_eq!(updated.status, SubscriptionStatus::PastDue);
        }
        let updated = svc
            .apply_renewal_failure(sub.id, None, "card declined")
            .await
            .unwrap();

        assert_eq!(updated.status, SubscriptionStatus::Canceled);
        assert_eq!(updated.renewal_attempts, 3);

        let events = notifier.events.lock().await;
        assert_eq!(events.iter().filter(|e| e.starts_with("failed:")).count(), 3);
        assert!(events.iter().any(|e| e.starts_with("canceled:")));
    }

    #[tokio::test]
    async fn successful_renewal_resets_dunning_counter() {
        let store = seeded_store().await;
        let svc = service(&store);
        let sub = growth_subscription(5, datetime!(2026-08-01 00:00 UTC));
        insert(&store, &sub).await;

        svc.apply_renewal_failure(sub.id, None, "card declined")
            .await
            .unwrap();
        let updated = svc.apply_renewal_success(sub.id, None).await.unwrap();

        assert_eq!(updated.status, SubscriptionStatus::Active);
        assert_eq!(updated.renewal_attempts, 0);
    }

    #[tokio::test]
    async fn canceled_is_terminal_for_charge_events() {
        let store = seeded_store().await;
        let svc = service(&store);
        let anchor = datetime!(2026-08-01 00:00 UTC);
        let mut sub = growth_subscription(5, anchor);
        sub.status = SubscriptionStatus::Canceled;
        insert(&store, &sub).await;

        let after_success = svc.apply_renewal_success(sub.id, None).await.unwrap();
        assert_eq!(after_success.status, SubscriptionStatus::Canceled);
        assert_eq!(after_success.current_period_end, anchor);

        let after_failure = svc
            .apply_renewal_failure(sub.id, None, "card declined")
            .await
            .unwrap();
        assert_eq!(after_failure.status, SubscriptionStatus::Canceled);

        let invoices = store.invoices_for_subscription(sub.id, 10).await.unwrap();
        assert!(invoices.is_empty(), "terminal state must ledger nothing");
    }

    // Two on-time renewals land exactly two calendar months out, with no
    // dependence on when the charges actually ran.
    #[tokio::test]
    async fn consecutive_renewals_do_not_drift_the_anchor() {
        let store = seeded_store().await;
        let svc = service(&store);
        let sub = growth_subscription(5, datetime!(2026-01-31 12:00 UTC));
        insert(&store, &sub).await;

        svc.apply_renewal_success(sub.id, None).await.unwrap();
        let updated = svc.apply_renewal_success(sub.id, None).await.unwrap();

        // Jan 31 -> Feb 28 (clamped) -> Mar 28.
        assert_eq!(updated.current_period_end, datetime!(2026-03-28 12:00 UTC));
    }

    #[tokio::test]
    async fn ledgered_invoices_are_unchanged_by_later_seat_updates() {
        let store = seeded_store().await;
        let svc = service(&store);
        let sub = growth_subscription(10, datetime!(2026-08-01 00:00 UTC));
        insert(&store, &sub).await;

        svc.apply_renewal_success(sub.id, None).await.unwrap();
        svc.update_terms(sub.id, Some(20), None).await.unwrap();
        svc.apply_renewal_success(sub.id, None).await.unwrap();

        let invoices = store.invoices_for_subscription(sub.id, 10).await.unwrap();
        let mut amounts: Vec<i64> = invoices.iter().map(|i| i.amount).collect();
        amounts.sort_unstable();
        assert_eq!(amounts, vec![99_000, 198_000]);
    }

    #[tokio::test]
    async fn seat_update_beyond_plan_limit_is_rejected() {
        let store = seeded_store().await;
        let svc = service(&store);
        let sub = growth_subscription(10, datetime!(2026-08-01 00:00 UTC));
        insert(&store, &sub).await;

        let err = svc.update_terms(sub.id, Some(26), None).await.unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));

        let err = svc.update_terms(sub.id, Some(0), None).await.unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));

        // Nothing changed.
        assert_eq!(svc.get(sub.id).await.unwrap().seats, 10);
    }

    #[tokio::test]
    async fn auto_renew_toggle_is_independent_of_status() {
        let store = seeded_store().await;
        let svc = service(&store);
        let mut sub = growth_subscription(5, datetime!(2026-08-01 00:00 UTC));
        sub.status = SubscriptionStatus::PastDue;
        insert(&store, &sub).await;

        let updated = svc.update_terms(sub.id, None, Some(false)).await.unwrap();
        assert!(!updated.auto_renew);
        assert_eq!(updated.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let store = seeded_store().await;
        let svc = service(&store);
        let sub = growth_subscription(5, datetime!(2026-08-01 00:00 UTC));
        insert(&store, &sub).await;

        let first = svc.cancel(sub.id).await.unwrap();
        let second = svc.cancel(sub.id).await.unwrap();
        assert_eq!(first.status, SubscriptionStatus::Canceled);
        assert_eq!(second.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn unknown_subscription_is_not_found() {
        let store = seeded_store().await;
        let svc = service(&store);
        let err = svc.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }
}

mod idempotency_tests {
    use super::*;

    fn payment_event(event_id: &str) -> CanonicalEvent {
        CanonicalEvent {
            provider_event_id: event_id.to_string(),
            gateway: GatewayKind::Stripe,
            kind: CanonicalEventKind::PaymentSucceeded {
                gateway_subscription: "sub_123".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn redelivered_payment_event_applies_once() {
        let store = seeded_store().await;
        let svc = service(&store);
        let anchor = datetime!(2026-08-01 00:00 UTC);
        let sub = growth_subscription(10, anchor);
        insert(&store, &sub).await;

        let event = payment_event("evt_once");
        svc.apply_event(&event).await.unwrap();
        svc.apply_event(&event).await.unwrap();
        svc.apply_event(&event).await.unwrap();

        let updated = svc.get(sub.id).await.unwrap();
        assert_eq!(
            updated.current_period_end,
            datetime!(2026-09-01 00:00 UTC),
            "period advanced exactly once"
        );
        let invoices = store.invoices_for_subscription(sub.id, 10).await.unwrap();
        assert_eq!(invoices.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_deliveries_apply_once() {
        let store = seeded_store().await;
        let svc = service(&store);
        let sub = growth_subscription(10, datetime!(2026-08-01 00:00 UTC));
        insert(&store, &sub).await;

        let event = payment_event("evt_race");
        let (a, b) = tokio::join!(svc.apply_event(&event), svc.apply_event(&event));
        a.unwrap();
        b.unwrap();

        let invoices = store.invoices_for_subscription(sub.id, 10).await.unwrap();
        assert_eq!(invoices.len(), 1, "exactly one invoice despite the race");
    }

    #[tokio::test]
    async fn redelivered_checkout_event_creates_one_subscription() {
        let store = seeded_store().await;
        let svc = service(&store);

        let event = CanonicalEvent {
            provider_event_id: "evt_checkout".to_string(),
            gateway: GatewayKind::Stripe,
            kind: CanonicalEventKind::CheckoutCompleted(CheckoutCompleted {
                plan_id: "plan_growth".to_string(),
                seats: 10,
                tenant_id: "tenant-acme".to_string(),
                gateway_customer: Some("cus_123".to_string()),
                gateway_subscription: Some("sub_new".to_string()),
            }),
        };

        svc.apply_event(&event).await.unwrap();
        svc.apply_event(&event).await.unwrap();

        let found = store
            .find_by_gateway_subscription(GatewayKind::Stripe, "sub_new")
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn same_event_id_from_different_gateways_is_distinct() {
        let store = seeded_store().await;
        let svc = service(&store);
        let mut stripe_sub = growth_subscription(5, datetime!(2026-08-01 00:00 UTC));
        stripe_sub.gateway_subscription = Some("ref_shared".to_string());
        insert(&store, &stripe_sub).await;

        let mut rzp_sub = growth_subscription(5, datetime!(2026-08-01 00:00 UTC));
        rzp_sub.gateway = GatewayKind::Razorpay;
        rzp_sub.gateway_subscription = Some("ref_shared".to_string());
        insert(&store, &rzp_sub).await;

        let stripe_event = CanonicalEvent {
            provider_event_id: "evt_1".to_string(),
            gateway: GatewayKind::Stripe,
            kind: CanonicalEventKind::PaymentSucceeded {
                gateway_subscription: "ref_shared".to_string(),
            },
        };
        let rzp_event = CanonicalEvent {
            provider_event_id: "evt_1".to_string(),
            gateway: GatewayKind::Razorpay,
            kind: CanonicalEventKind::PaymentSucceeded {
                gateway_subscription: "ref_shared".to_string(),
            },
        };

        svc.apply_event(&stripe_event).await.unwrap();
        svc.apply_event(&rzp_event).await.unwrap();

        let stripe_invoices = store
            .invoices_for_subscription(stripe_sub.id, 10)
            .await
            .unwrap();
        let rzp_invoices = store.invoices_for_subscription(rzp_sub.id, 10).await.unwrap();
        assert_eq!(stripe_invoices.len(), 1);
        assert_eq!(rzp_invoices.len(), 1);
    }
}

mod checkout_event_tests {
    use super::*;

    fn checkout_event(plan_id: &str, seats: i32) -> CanonicalEvent {
        CanonicalEvent {
            provider_event_id: "evt_checkout".to_string(),
            gateway: GatewayKind::Stripe,
            kind: CanonicalEventKind::CheckoutCompleted(CheckoutCompleted {
                plan_id: plan_id.to_string(),
                seats,
                tenant_id: "tenant-acme".to_string(),
                gateway_customer: Some("cus_123".to_string()),
                gateway_subscription: Some("sub_new".to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn checkout_completion_creates_active_subscription() {
        let store = seeded_store().await;
        let svc = service(&store);

        svc.apply_event(&checkout_event("plan_growth", 10))
            .await
            .unwrap();

        let sub = store
            .find_by_gateway_subscription(GatewayKind::Stripe, "sub_new")
            .await
            .unwrap()
            .expect("subscription created");
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.plan_id, "plan_growth");
        assert_eq!(sub.seats, 10);
        assert!(sub.auto_renew);
    }

    #[tokio::test]
    async fn checkout_with_unknown_plan_is_not_found() {
        let store = seeded_store().await;
        let svc = service(&store);
        let err = svc
            .apply_event(&checkout_event("plan_missing", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }

    #[tokio::test]
    async fn checkout_exceeding_seat_limit_is_rejected() {
        let store = seeded_store().await;
        let svc = service(&store);
        let err = svc
            .apply_event(&checkout_event("plan_growth", 26))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    // Payment arriving before its checkout event: not found, so the
    // provider redelivers after the checkout event lands.
    #[tokio::test]
    async fn payment_for_unknown_subscription_is_not_found() {
        let store = seeded_store().await;
        let svc = service(&store);

        let event = CanonicalEvent {
            provider_event_id: "evt_early".to_string(),
            gateway: GatewayKind::Stripe,
            kind: CanonicalEventKind::PaymentSucceeded {
                gateway_subscription: "sub_unknown".to_string(),
            },
        };
        let err = svc.apply_event(&event).await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
        assert!(
            !store
                .is_event_processed(GatewayKind::Stripe, "evt_early")
                .await
                .unwrap(),
            "failed delivery must stay unprocessed so redelivery works"
        );
    }
}

mod sweep_tests {
    use super::*;
    use crate::renewal::RenewalService;
    use std::collections::HashMap;

    #[derive(Clone, Copy)]
    enum Script {
        Succeed,
        Decline,
        Unavailable,
        Error,
    }

    /// Gateway stub with a per-subscription scripted charge outcome.
    struct FakeGateway {
        scripts: HashMap<Uuid, Script>,
    }

    #[async_trait]
    impl GatewayAdapter for FakeGateway {
        fn kind(&self) -> GatewayKind {
            GatewayKind::Stripe
        }

        async fn create_checkout(
            &self,
            _request: &CheckoutRequest,
        ) -> BillingResult<CheckoutSession> {
            Err(BillingError::Gateway("not scripted".to_string()))
        }

        fn verify_signature(&self, _payload: &[u8], _signature_header: &str) -> bool {
            true
        }

        fn translate_webhook(&self, _payload: &[u8]) -> BillingResult<CanonicalEvent> {
            Err(BillingError::Payload("not scripted".to_string()))
        }

        async fn charge_renewal(
            &self,
            subscription: &Subscription,
            _amount: i64,
        ) -> BillingResult<ChargeOutcome> {
            match self.scripts.get(&subscription.id) {
                Some(Script::Succeed) | None => Ok(ChargeOutcome::Succeeded),
                Some(Script::Decline) => Ok(ChargeOutcome::Declined {
                    reason: "card declined".to_string(),
                }),
                Some(Script::Unavailable) => Err(BillingError::GatewayUnavailable(
                    "connection refused".to_string(),
                )),
                Some(Script::Error) => Err(BillingError::Gateway("boom".to_string())),
            }
        }
    }

    fn sweep(
        store: &Arc<MemoryStore>,
        svc: &Arc<SubscriptionService>,
        scripts: HashMap<Uuid, Script>,
    ) -> RenewalService {
        RenewalService::new(
            store.clone(),
            Arc::new(FakeGateway { scripts }),
            svc.clone(),
        )
    }

    fn due() -> OffsetDateTime {
        OffsetDateTime::now_utc() - time::Duration::days(1)
    }

    #[tokio::test]
    async fn sweep_renews_due_subscriptions() {
        let store = seeded_store().await;
        let svc = service(&store);
        let sub = growth_subscription(10, due());
        insert(&store, &sub).await;

        let summary = sweep(&store, &svc, HashMap::new()).run_sweep().await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.renewed, 1);

        let invoices = store.invoices_for_subscription(sub.id, 10).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].amount, 99_000);
    }

    #[tokio::test]
    async fn sweep_skips_auto_renew_disabled() {
        let store = seeded_store().await;
        let svc = service(&store);
        let mut sub = growth_subscription(10, due());
        sub.auto_renew = false;
        insert(&store, &sub).await;

        let summary = sweep(&store, &svc, HashMap::new()).run_sweep().await.unwrap();
        assert_eq!(summary.processed, 0);

        let after = svc.get(sub.id).await.unwrap();
        assert_eq!(after.current_period_end, sub.current_period_end);
        assert!(store
            .invoices_for_subscription(sub.id, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn sweep_skips_subscriptions_not_yet_due() {
        let store = seeded_store().await;
        let svc = service(&store);
        let sub = growth_subscription(10, OffsetDateTime::now_utc() + time::Duration::days(10));
        insert(&store, &sub).await;

        let summary = sweep(&store, &svc, HashMap::new()).run_sweep().await.unwrap();
        assert_eq!(summary.processed, 0);
    }

    // Unknown charge outcome: no transition, no invoice. The next sweep
    // sees the subscription again.
    #[tokio::test]
    async fn gateway_outage_defers_without_transition() {
        let store = seeded_store().await;
        let svc = service(&store);
        let sub = growth_subscription(10, due());
        insert(&store, &sub).await;

        let scripts = HashMap::from([(sub.id, Script::Unavailable)]);
        let summary = sweep(&store, &svc, scripts).run_sweep().await.unwrap();
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.renewed, 0);
        assert_eq!(summary.failed, 0);

        let after = svc.get(sub.id).await.unwrap();
        assert_eq!(after.status, SubscriptionStatus::Active);
        assert_eq!(after.current_period_end, sub.current_period_end);
        assert_eq!(after.renewal_attempts, 0, "unknown outcome is not a decline");
        assert!(store
            .invoices_for_subscription(sub.id, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn one_bad_item_does_not_abort_the_sweep() {
        let store = seeded_store().await;
        let svc = service(&store);
        let broken = growth_subscription(5, due());
        let declined = growth_subscription(5, due());
        let healthy = growth_subscription(5, due());
        insert(&store, &broken).await;
        insert(&store, &declined).await;
        insert(&store, &healthy).await;

        let scripts = HashMap::from([
            (broken.id, Script::Error),
            (declined.id, Script::Decline),
            (healthy.id, Script::Succeed),
        ]);
        let summary = sweep(&store, &svc, scripts).run_sweep().await.unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.renewed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors, 1);

        assert_eq!(
            svc.get(healthy.id).await.unwrap().status,
            SubscriptionStatus::Active
        );
        assert_eq!(
            svc.get(declined.id).await.unwrap().status,
            SubscriptionStatus::PastDue
        );
    }

    // past_due stays in the sweep so dunning retries actually happen.
    #[tokio::test]
    async fn past_due_subscription_is_retried_until_exhausted() {
        let store = seeded_store().await;
        let svc = service_with(
            &store,
            Arc::new(LogNotifier),
            DunningPolicy { max_attempts: 2 },
        );
        let sub = growth_subscription(5, due());
        insert(&store, &sub).await;

        let scripts = HashMap::from([(sub.id, Script::Decline)]);
        let renewal = sweep(&store, &svc, scripts);

        renewal.run_sweep().await.unwrap();
        assert_eq!(svc.get(sub.id).await.unwrap().status, SubscriptionStatus::PastDue);

        renewal.run_sweep().await.unwrap();
        assert_eq!(
            svc.get(sub.id).await.unwrap().status,
            SubscriptionStatus::Canceled
        );

        // Canceled drops out of the due set.
        let summary = renewal.run_sweep().await.unwrap();
        assert_eq!(summary.processed, 0);
    }
}

mod checkout_http_tests {
    use super::*;
    use crate::checkout::CheckoutService;
    use crate::config::{RazorpayConfig, StripeConfig};
    use crate::gateway::{RazorpayGateway, StripeGateway};

    fn stripe_config(api_base: &str) -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
            api_base: api_base.to_string(),
        }
    }

    fn razorpay_config(api_base: &str) -> RazorpayConfig {
        RazorpayConfig {
            key_id: "rzp_test_id".to_string(),
            key_secret: "rzp_test_secret".to_string(),
            webhook_secret: "rzp_whsec_test".to_string(),
            api_base: api_base.to_string(),
        }
    }

    #[tokio::test]
    async fn stripe_checkout_session_is_created() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/checkout/sessions")
            .match_header("authorization", "Bearer sk_test_123")
            .with_status(200)
            .with_body(r#"{"id":"cs_test_1","url":"https://checkout.stripe.com/c/pay/cs_test_1"}"#)
            .create_async()
            .await;

        let store = seeded_store().await;
        let gateway = Arc::new(StripeGateway::new(stripe_config(&server.url())).unwrap());
        let checkout = CheckoutService::new(
            store.clone(),
            gateway,
            "https://console.example.com".to_string(),
        );

        let session = checkout
            .create_session("plan_growth", 10, "tenant-acme")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(session.id, "cs_test_1");
        assert_eq!(session.gateway, GatewayKind::Stripe);
        assert!(session.url.contains("checkout.stripe.com"));
    }

    #[tokio::test]
    async fn stripe_api_error_surfaces_as_gateway_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/checkout/sessions")
            .with_status(400)
            .with_body(r#"{"error":{"message":"Invalid currency"}}"#)
            .create_async()
            .await;

        let store = seeded_store().await;
        let gateway = Arc::new(StripeGateway::new(stripe_config(&server.url())).unwrap());
        let checkout = CheckoutService::new(
            store.clone(),
            gateway,
            "https://console.example.com".to_string(),
        );

        let err = checkout
            .create_session("plan_growth", 10, "tenant-acme")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Gateway(_)));
        assert!(err.to_string().contains("Invalid currency"));
    }

    #[tokio::test]
    async fn razorpay_checkout_runs_order_then_payment_link() {
        let mut server = mockito::Server::new_async().await;
        let order_mock = server
            .mock("POST", "/v1/orders")
            .with_status(200)
            .with_body(r#"{"id":"order_1","amount":99000,"currency":"INR"}"#)
            .create_async()
            .await;
        let link_mock = server
            .mock("POST", "/v1/payment_links")
            .with_status(200)
            .with_body(r#"{"short_url":"https://rzp.io/l/abc123"}"#)
            .create_async()
            .await;

        let store = seeded_store().await;
        let gateway = Arc::new(RazorpayGateway::new(razorpay_config(&server.url())).unwrap());
        let checkout = CheckoutService::new(
            store.clone(),
            gateway,
            "https://console.example.com".to_string(),
        );

        let session = checkout
            .create_session("plan_growth", 10, "tenant-acme")
            .await
            .unwrap();

        order_mock.assert_async().await;
        link_mock.assert_async().await;
        assert_eq!(session.id, "order_1");
        assert_eq!(session.gateway, GatewayKind::Razorpay);
        assert_eq!(session.url, "https://rzp.io/l/abc123");
    }

    #[tokio::test]
    async fn validation_failures_never_reach_the_gateway() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/checkout/sessions")
            .expect(0)
            .create_async()
            .await;

        let store = seeded_store().await;
        let gateway = Arc::new(StripeGateway::new(stripe_config(&server.url())).unwrap());
        let checkout = CheckoutService::new(
            store.clone(),
            gateway,
            "https://console.example.com".to_string(),
        );

        assert!(matches!(
            checkout.create_session("plan_growth", 26, "tenant-acme").await,
            Err(BillingError::Validation(_))
        ));
        assert!(matches!(
            checkout.create_session("plan_growth", 0, "tenant-acme").await,
            Err(BillingError::Validation(_))
        ));
        assert!(matches!(
            checkout.create_session("plan_growth", 5, "  ").await,
            Err(BillingError::Validation(_))
        ));
        assert!(matches!(
            checkout.create_session("plan_missing", 5, "tenant-acme").await,
            Err(BillingError::NotFound(_))
        ));
        mock.assert_async().await;
    }
}

mod webhook_pipeline_tests {
    use super::*;
    use crate::config::{RazorpayConfig, StripeConfig};
    use crate::gateway::{RazorpayGateway, StripeGateway};
    use crate::signature::{razorpay_test_signature, stripe_test_header};
    use crate::webhooks::WebhookPipeline;

    const STRIPE_SECRET: &str = "whsec_stripe_test";
    const RZP_SECRET: &str = "whsec_rzp_test";

    fn stripe_pipeline(store: &Arc<MemoryStore>) -> WebhookPipeline {
        let gateway = Arc::new(
            StripeGateway::new(StripeConfig {
                secret_key: "sk_test_123".to_string(),
                webhook_secret: STRIPE_SECRET.to_string(),
                api_base: "http://127.0.0.1:1".to_string(),
            })
            .unwrap(),
        );
        WebhookPipeline::new(gateway, service(store))
    }

    fn razorpay_pipeline(store: &Arc<MemoryStore>) -> WebhookPipeline {
        let gateway = Arc::new(
            RazorpayGateway::new(RazorpayConfig {
                key_id: "rzp_test_id".to_string(),
                key_secret: "rzp_test_secret".to_string(),
                webhook_secret: RZP_SECRET.to_string(),
                api_base: "http://127.0.0.1:1".to_string(),
            })
            .unwrap(),
        );
        WebhookPipeline::new(gateway, service(store))
    }

    fn stripe_checkout_payload() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_checkout_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "customer": "cus_123",
                    "subscription": "sub_123",
                    "metadata": {
                        "plan_id": "plan_growth",
                        "seats": "10",
                        "tenant_id": "tenant-acme"
                    }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn signed_stripe_checkout_event_creates_subscription() {
        let store = seeded_store().await;
        let pipeline = stripe_pipeline(&store);
        let payload = stripe_checkout_payload();
        let header = stripe_test_header(
            STRIPE_SECRET,
            OffsetDateTime::now_utc().unix_timestamp(),
            &payload,
        );

        pipeline
            .ingest(GatewayKind::Stripe, &payload, Some(&header))
            .await
            .unwrap();

        let sub = store
            .find_by_gateway_subscription(GatewayKind::Stripe, "sub_123")
            .await
            .unwrap()
            .expect("subscription created");
        assert_eq!(sub.seats, 10);
    }

    #[tokio::test]
    async fn signed_payment_event_ledgers_invoice() {
        let store = seeded_store().await;
        let pipeline = stripe_pipeline(&store);
        let sub = growth_subscription(10, datetime!(2026-08-01 00:00 UTC));
        insert(&store, &sub).await;

        let payload = serde_json::json!({
            "id": "evt_pay_1",
            "type": "invoice.payment_succeeded",
            "data": { "object": { "subscription": "sub_123" } }
        })
        .to_string()
        .into_bytes();
        let header = stripe_test_header(
            STRIPE_SECRET,
            OffsetDateTime::now_utc().unix_timestamp(),
            &payload,
        );

        pipeline
            .ingest(GatewayKind::Stripe, &payload, Some(&header))
            .await
            .unwrap();

        let invoices = store.invoices_for_subscription(sub.id, 10).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].amount, 99_000);
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_with_no_side_effects() {
        let store = seeded_store().await;
        let pipeline = stripe_pipeline(&store);
        let payload = stripe_checkout_payload();
        let header = stripe_test_header(
            "whsec_wrong_secret",
            OffsetDateTime::now_utc().unix_timestamp(),
            &payload,
        );

        let err = pipeline
            .ingest(GatewayKind::Stripe, &payload, Some(&header))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));

        assert!(store
            .find_by_gateway_subscription(GatewayKind::Stripe, "sub_123")
            .await
            .unwrap()
            .is_none());
        assert!(!store
            .is_event_processed(GatewayKind::Stripe, "evt_checkout_1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn missing_signature_header_is_rejected() {
        let store = seeded_store().await;
        let pipeline = stripe_pipeline(&store);
        let err = pipeline
            .ingest(GatewayKind::Stripe, &stripe_checkout_payload(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    #[tokio::test]
    async fn delivery_for_wrong_provider_is_rejected() {
        let store = seeded_store().await;
        let pipeline = stripe_pipeline(&store);
        let err = pipeline
            .ingest(GatewayKind::Razorpay, b"{}", Some("deadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[tokio::test]
    async fn unhandled_event_types_are_acknowledged() {
        let store = seeded_store().await;
        let pipeline = stripe_pipeline(&store);
        let payload = serde_json::json!({
            "id": "evt_other",
            "type": "customer.updated",
            "data": { "object": {} }
        })
        .to_string()
        .into_bytes();
        let header = stripe_test_header(
            STRIPE_SECRET,
            OffsetDateTime::now_utc().unix_timestamp(),
            &payload,
        );

        pipeline
            .ingest(GatewayKind::Stripe, &payload, Some(&header))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn signed_razorpay_capture_creates_subscription() {
        let store = seeded_store().await;
        let pipeline = razorpay_pipeline(&store);
        let payload = serde_json::json!({
            "event": "payment.captured",
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_1",
                        "order_id": "order_1",
                        "customer_id": "cust_1",
                        "notes": {
                            "plan_id": "plan_starter",
                            "seats": "3",
                            "tenant_id": "tenant-acme"
                        }
                    }
                }
            }
        })
        .to_string()
        .into_bytes();
        let signature = razorpay_test_signature(RZP_SECRET, &payload);

        pipeline
            .ingest(GatewayKind::Razorpay, &payload, Some(&signature))
            .await
            .unwrap();

        let sub = store
            .find_by_gateway_subscription(GatewayKind::Razorpay, "order_1")
            .await
            .unwrap()
            .expect("subscription created");
        assert_eq!(sub.plan_id, "plan_starter");
        assert_eq!(sub.seats, 3);
    }

    #[tokio::test]
    async fn tampered_razorpay_payload_is_rejected() {
        let store = seeded_store().await;
        let pipeline = razorpay_pipeline(&store);
        let payload = br#"{"event":"payment.captured","payload":{}}"#;
        let signature = razorpay_test_signature(RZP_SECRET, payload);
        let tampered = br#"{"event":"payment.captured","payload":{"x":1}}"#;

        let err = pipeline
            .ingest(GatewayKind::Razorpay, tampered, Some(&signature))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }
}

mod seat_limit_property_tests {
    use super::*;
    use rand::Rng;

    // Randomized seat counts: anything in [1, limit] is accepted, anything
    // outside is rejected, regardless of order of operations.
    #[tokio::test]
    async fn random_seat_updates_respect_plan_limit() {
        let store = seeded_store().await;
        let svc = service(&store);
        let sub = growth_subscription(10, datetime!(2026-08-01 00:00 UTC));
        insert(&store, &sub).await;

        let mut rng = rand::rng();
        for _ in 0..50 {
            let seats: i32 = rng.random_range(-5..=40);
            let result = svc.update_terms(sub.id, Some(seats), None).await;
            if (1..=25).contains(&seats) {
                assert_eq!(result.unwrap().seats, seats);
            } else {
                assert!(matches!(result, Err(BillingError::Validation(_))));
            }
        }

        let final_seats = svc.get(sub.id).await.unwrap().seats;
        assert!((1..=25).contains(&final_seats));
    }
}
