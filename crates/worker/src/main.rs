//! Chatdesk Background Worker
//!
//! Handles scheduled jobs:
//! - Subscription renewal sweep (daily at 3:00 UTC)
//! - Health check heartbeat (every 5 minutes)
//!
//! The renewal sweep also runs once at startup so a worker that was down
//! over the scheduled time catches up immediately.

use std::sync::Arc;

use chatdesk_billing::{BillingService, BillingStore, MemoryStore, PgStore, SweepSummary};
use chatdesk_shared::{create_pool, run_migrations};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

fn log_sweep_summary(summary: &SweepSummary) {
    info!(
        processed = summary.processed,
        renewed = summary.renewed,
        failed = summary.failed,
        deferred = summary.deferred,
        errors = summary.errors,
        "Renewal sweep cycle complete"
    );
}

async fn run_sweep(billing: &BillingService) {
    match billing.renewal.run_sweep().await {
        Ok(summary) => log_sweep_summary(&summary),
        Err(e) => error!(error = %e, "Renewal sweep aborted"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Chatdesk Worker");

    let store: Arc<dyn BillingStore> = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.is_empty() => {
            let pool = create_pool(&url).await?;
            run_migrations(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        _ => {
            warn!("DATABASE_URL not set - running with in-memory store (demo mode)");
            Arc::new(MemoryStore::new())
        }
    };

    let billing = Arc::new(BillingService::from_env(store)?);
    info!("Billing service initialized");

    // Catch-up sweep on startup.
    run_sweep(&billing).await;

    let scheduler = JobScheduler::new().await?;

    // Job 1: Renewal sweep, daily at 3:00 UTC.
    let sweep_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let billing = sweep_billing.clone();
            Box::pin(async move {
                info!("Running scheduled renewal sweep");
                run_sweep(&billing).await;
            })
        })?)
        .await?;
    info!("Scheduled: Renewal sweep (daily at 3:00 UTC)");

    // Job 2: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker scheduler started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping worker");
    Ok(())
}
