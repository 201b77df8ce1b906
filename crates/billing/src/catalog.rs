//! Plan catalog seeding.

use crate::error::BillingResult;
use crate::models::Plan;
use crate::store::BillingStore;

/// Default plan catalog. Prices are per seat per month in minor units.
pub fn default_plans() -> Vec<Plan> {
    vec![
        Plan {
            id: "plan_starter".to_string(),
            name: "Starter".to_string(),
            price_monthly: 2_900,
            seat_limit: 5,
        },
        Plan {
            id: "plan_growth".to_string(),
            name: "Growth".to_string(),
            price_monthly: 9_900,
            seat_limit: 25,
        },
        Plan {
            id: "plan_enterprise".to_string(),
            name: "Enterprise".to_string(),
            price_monthly: 29_900,
            seat_limit: 100,
        },
    ]
}

/// Upsert the default catalog. Idempotent; safe to run on every startup.
pub async fn seed_default_plans(store: &dyn BillingStore) -> BillingResult<()> {
    let plans = default_plans();
    store.seed_plans(&plans).await?;
    tracing::info!(count = plans.len(), "Plan catalog seeded");
    Ok(())
}
