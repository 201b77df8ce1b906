//! Postgres store implementation.
//!
//! `commit_transition` wraps the subscription update, invoice append, and
//! processed-event insert in one database transaction, so a crash mid-way
//! leaves no half-applied transition.

use std::str::FromStr;

use async_trait::async_trait;
use chatdesk_shared::{GatewayKind, InvoiceStatus, SubscriptionStatus};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{Invoice, NewInvoice, Plan, Subscription};
use crate::store::{BillingStore, ProcessedEvent, TransitionCommit};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: String,
    name: String,
    price_monthly: i64,
    seat_limit: i32,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Plan {
            id: row.id,
            name: row.name,
            price_monthly: row.price_monthly,
            seat_limit: row.seat_limit,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    tenant_id: String,
    plan_id: String,
    seats: i32,
    status: String,
    gateway: String,
    gateway_customer: Option<String>,
    gateway_subscription: Option<String>,
    current_period_end: OffsetDateTime,
    auto_renew: bool,
    renewal_attempts: i32,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            tenant_id: row.tenant_id,
            plan_id: row.plan_id,
            seats: row.seats,
            status: SubscriptionStatus::from_str(&row.status)
                .map_err(|e| BillingError::Invariant(e.to_string()))?,
            gateway: GatewayKind::from_str(&row.gateway)
                .map_err(|e| BillingError::Invariant(e.to_string()))?,
            gateway_customer: row.gateway_customer,
            gateway_subscription: row.gateway_subscription,
            current_period_end: row.current_period_end,
            auto_renew: row.auto_renew,
            renewal_attempts: row.renewal_attempts,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    subscription_id: Uuid,
    amount: i64,
    status: String,
    period_start: OffsetDateTime,
    issued_at: OffsetDateTime,
    pdf_url: Option<String>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            id: row.id,
            subscription_id: row.subscription_id,
            amount: row.amount,
            status: InvoiceStatus::from_str(&row.status)
                .map_err(|e| BillingError::Invariant(e.to_string()))?,
            period_start: row.period_start,
            issued_at: row.issued_at,
            pdf_url: row.pdf_url,
        })
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, tenant_id, plan_id, seats, status, gateway, \
     gateway_customer, gateway_subscription, current_period_end, auto_renew, renewal_attempts";

#[async_trait]
impl BillingStore for PgStore {
    async fn list_plans(&self) -> BillingResult<Vec<Plan>> {
        let rows: Vec<PlanRow> = sqlx::query_as(
            "SELECT id, name, price_monthly, seat_limit FROM plans ORDER BY price_monthly ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Plan::from).collect())
    }

    async fn get_plan(&self, plan_id: &str) -> BillingResult<Option<Plan>> {
        let row: Option<PlanRow> =
            sqlx::query_as("SELECT id, name, price_monthly, seat_limit FROM plans WHERE id = $1")
                .bind(plan_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Plan::from))
    }

    async fn seed_plans(&self, plans: &[Plan]) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;
        for plan in plans {
            sqlx::query(
                r#"
                INSERT INTO plans (id, name, price_monthly, seat_limit)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&plan.id)
            .bind(&plan.name)
            .bind(plan.price_monthly)
            .bind(plan.seat_limit)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_gateway_subscription(
        &self,
        gateway: GatewayKind,
        reference: &str,
    ) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE gateway = $1 AND gateway_subscription = $2"
        ))
        .bind(gateway.as_str())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn due_for_renewal(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE current_period_end < $1 \
               AND status IN ('active', 'trialing', 'past_due') \
               AND auto_renew = TRUE \
             ORDER BY current_period_end ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn invoices_for_subscription(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<Invoice>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(
            "SELECT id, subscription_id, amount, status, period_start, issued_at, pdf_url \
             FROM invoices WHERE subscription_id = $1 \
             ORDER BY issued_at DESC LIMIT $2",
        )
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Invoice::try_from).collect()
    }

    async fn is_event_processed(
        &self,
        gateway: GatewayKind,
        provider_event_id: &str,
    ) -> BillingResult<bool> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM webhook_events WHERE gateway = $1 AND provider_event_id = $2",
        )
        .bind(gateway.as_str())
        .bind(provider_event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
        processed_event: Option<&ProcessedEvent>,
    ) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, tenant_id, plan_id, seats, status, gateway,
                 gateway_customer, gateway_subscription, current_period_end,
                 auto_renew, renewal_attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.tenant_id)
        .bind(&subscription.plan_id)
        .bind(subscription.seats)
        .bind(subscription.status.as_str())
        .bind(subscription.gateway.as_str())
        .bind(&subscription.gateway_customer)
        .bind(&subscription.gateway_subscription)
        .bind(subscription.current_period_end)
        .bind(subscription.auto_renew)
        .bind(subscription.renewal_attempts)
        .execute(&mut *tx)
        .await?;

        if let Some(event) = processed_event {
            insert_event(&mut tx, event).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn commit_transition(
        &self,
        commit: TransitionCommit<'_>,
    ) -> BillingResult<Option<Invoice>> {
        let mut tx = self.pool.begin().await?;
        let sub = commit.subscription;

        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET seats = $2, status = $3, gateway_customer = $4,
                gateway_subscription = $5, current_period_end = $6,
                auto_renew = $7, renewal_attempts = $8, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(sub.id)
        .bind(sub.seats)
        .bind(sub.status.as_str())
        .bind(&sub.gateway_customer)
        .bind(&sub.gateway_subscription)
        .bind(sub.current_period_end)
        .bind(sub.auto_renew)
        .bind(sub.renewal_attempts)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("subscription {}", sub.id)));
        }

        let appended = match commit.invoice {
            Some(new_invoice) => Some(insert_invoice(&mut tx, new_invoice).await?),
            None => None,
        };

        if let Some(event) = commit.processed_event {
            insert_event(&mut tx, event).await?;
        }

        tx.commit().await?;
        Ok(appended)
    }
}

async fn insert_invoice(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    new_invoice: &NewInvoice,
) -> BillingResult<Invoice> {
    let invoice = new_invoice.clone().into_invoice();

    let result = sqlx::query(
        r#"
        INSERT INTO invoices (id, subscription_id, amount, status, period_start, issued_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(invoice.id)
    .bind(invoice.subscription_id)
    .bind(invoice.amount)
    .bind(invoice.status.as_str())
    .bind(invoice.period_start)
    .bind(invoice.issued_at)
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(invoice),
        // The partial unique index on (subscription_id, period_start) for
        // paid invoices turns a double-charge into a constraint violation.
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(BillingError::Invariant(format!(
                "paid invoice already ledgered for subscription {} cycle {}",
                invoice.subscription_id, invoice.period_start
            )))
        }
        Err(e) => Err(e.into()),
    }
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &ProcessedEvent,
) -> BillingResult<()> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO webhook_events (gateway, provider_event_id, outcome)
        VALUES ($1, $2, $3)
        ON CONFLICT (gateway, provider_event_id) DO NOTHING
        "#,
    )
    .bind(event.gateway.as_str())
    .bind(&event.provider_event_id)
    .bind(&event.outcome)
    .execute(&mut **tx)
    .await?;

    if inserted.rows_affected() == 0 {
        // Another delivery won the race; rolling back leaves no partial effect.
        return Err(BillingError::Invariant(format!(
            "event {} already processed",
            event.provider_event_id
        )));
    }
    Ok(())
}
