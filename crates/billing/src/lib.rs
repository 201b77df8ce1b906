// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries provider error bodies
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Chatdesk Billing Module
//!
//! Payment and subscription coordination for the console: checkout
//! session creation, webhook ingestion with signature verification,
//! the subscription state machine, the append-only invoice ledger, and
//! the renewal sweep.
//!
//! ## Features
//!
//! - **Checkout**: Create provider checkout sessions (Stripe or Razorpay)
//! - **Webhooks**: Verify signatures over raw bytes, translate to canonical events
//! - **Subscriptions**: Lifecycle state machine with atomic invoice + status transitions
//! - **Invoices**: Append-only ledger in minor currency units
//! - **Renewals**: Daily sweep charging lapsed periods with dunning
//! - **Notifications**: Payment success/failure and cancellation hooks

pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod period;
pub mod renewal;
pub mod signature;
pub mod store;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

use std::sync::Arc;

// Catalog
pub use catalog::{default_plans, seed_default_plans};

// Checkout
pub use checkout::CheckoutService;

// Config
pub use config::{AppEnv, GatewayConfig, RazorpayConfig, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{CanonicalEvent, CanonicalEventKind, CheckoutCompleted};

// Gateway
pub use gateway::{
    build_gateway, ChargeOutcome, CheckoutRequest, CheckoutSession, GatewayAdapter,
};

// Models
pub use models::{Invoice, NewInvoice, Plan, Subscription};

// Notifications
pub use notify::{LogNotifier, Notifier};

// Renewal
pub use renewal::{RenewalService, SweepSummary};

// Store
pub use store::{BillingStore, MemoryStore, PgStore, ProcessedEvent, TransitionCommit};

// Subscriptions
pub use subscriptions::{DunningPolicy, SubscriptionDetail, SubscriptionService};

// Webhooks
pub use webhooks::WebhookPipeline;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub subscriptions: Arc<SubscriptionService>,
    pub webhooks: WebhookPipeline,
    pub renewal: RenewalService,
    pub store: Arc<dyn BillingStore>,
}

impl BillingService {
    /// Create a new billing service with explicit config
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn Notifier>,
        dunning: DunningPolicy,
    ) -> BillingResult<Self> {
        let gateway = build_gateway(config)?;
        let subscriptions = Arc::new(SubscriptionService::new(
            store.clone(),
            notifier,
            dunning,
        ));

        Ok(Self {
            checkout: CheckoutService::new(
                store.clone(),
                gateway.clone(),
                config.frontend_url.clone(),
            ),
            webhooks: WebhookPipeline::new(gateway.clone(), subscriptions.clone()),
            renewal: RenewalService::new(store.clone(), gateway, subscriptions.clone()),
            subscriptions,
            store,
        })
    }

    /// Create a new billing service from environment variables
    pub fn from_env(store: Arc<dyn BillingStore>) -> BillingResult<Self> {
        let env = AppEnv::from_env();
        let config = GatewayConfig::from_env(env)?;
        Self::new(
            &config,
            store,
            Arc::new(LogNotifier),
            DunningPolicy::from_env(),
        )
    }
}
