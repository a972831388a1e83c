//! Postgres-backed billing store
//!
//! Transactions run at READ COMMITTED. Concurrency safety comes from the
//! unique constraints rather than isolation level:
//! - `subscription_events (provider, event_id)`: the claim is an
//!   `INSERT … ON CONFLICT DO NOTHING RETURNING`, so a concurrent delivery of
//!   the same event blocks on the uncommitted row and then sees the conflict.
//! - `subscriptions (tenant_id)`: inserts use `ON CONFLICT (tenant_id) DO NOTHING`;
//!   the resolver falls back to the update path when it loses that race.
//! - Resolver lookups take `FOR UPDATE` row locks.

use async_trait::async_trait;
use keel_shared::BillingProvider;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{BillingStore, BillingTransaction};
use crate::error::BillingResult;
use crate::models::{NewSubscriptionEvent, Subscription, SubscriptionEventRecord};

const SUBSCRIPTION_COLUMNS: &str = "id, tenant_id, purchased_by_user_id, status, plan_id, plan_name, \
     current_period_start, current_period_end, cancel_at_period_end, provider, \
     polar_subscription_id, polar_customer_id, revenuecat_app_user_id, \
     revenuecat_original_app_user_id, created_at, updated_at";

/// Column holding each provider's subscription identifier
fn provider_id_column(provider: BillingProvider) -> &'static str {
    match provider {
        BillingProvider::Polar => "polar_subscription_id",
        BillingProvider::RevenueCat => "revenuecat_app_user_id",
    }
}

#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn event_exists(&self, provider: BillingProvider, event_id: &str) -> BillingResult<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM subscription_events WHERE provider = $1 AND event_id = $2
            )
            "#,
        )
        .bind(provider.as_str())
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    async fn begin(&self) -> BillingResult<Box<dyn BillingTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgBillingTransaction { tx }))
    }

    async fn find_subscription_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE tenant_id = $1",
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, Subscription>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_events(
        &self,
        provider: Option<BillingProvider>,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<SubscriptionEventRecord>> {
        let records = match provider {
            Some(provider) => {
                sqlx::query_as(
                    r#"
                    SELECT id, provider, event_id, event_type, payload, processed_at
                    FROM subscription_events
                    WHERE provider = $1
                    ORDER BY processed_at DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(provider.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id, provider, event_id, event_type, payload, processed_at
                    FROM subscription_events
                    ORDER BY processed_at DESC
                    LIMIT $1 OFFSET $2
                    "#,
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }

    async fn prune_events_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64> {
        let result = sqlx::query("DELETE FROM subscription_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

struct PgBillingTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BillingTransaction for PgBillingTransaction {
    async fn claim_event(&mut self, event: &NewSubscriptionEvent) -> BillingResult<bool> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO subscription_events (id, provider, event_id, event_type, payload, processed_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (provider, event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.provider.as_str())
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(claimed.is_some())
    }

    async fn find_by_provider_id(
        &mut self,
        provider: BillingProvider,
        provider_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE {} = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS,
            provider_id_column(provider)
        );
        let row = sqlx::query_as::<_, Subscription>(&sql)
            .bind(provider_subscription_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn find_by_tenant(&mut self, tenant_id: Uuid) -> BillingResult<Option<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE tenant_id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, Subscription>(&sql)
            .bind(tenant_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn insert_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> BillingResult<Option<Subscription>> {
        let sql = format!(
            r#"
            INSERT INTO subscriptions ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (tenant_id) DO NOTHING
            RETURNING {cols}
            "#,
            cols = SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, Subscription>(&sql)
            .bind(subscription.id)
            .bind(subscription.tenant_id)
            .bind(subscription.purchased_by_user_id)
            .bind(subscription.status.as_str())
            .bind(&subscription.plan_id)
            .bind(&subscription.plan_name)
            .bind(subscription.current_period_start)
            .bind(subscription.current_period_end)
            .bind(subscription.cancel_at_period_end)
            .bind(subscription.provider.as_str())
            .bind(&subscription.polar_subscription_id)
            .bind(&subscription.polar_customer_id)
            .bind(&subscription.revenuecat_app_user_id)
            .bind(&subscription.revenuecat_original_app_user_id)
            .bind(subscription.created_at)
            .bind(subscription.updated_at)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> BillingResult<Subscription> {
        let sql = format!(
            r#"
            UPDATE subscriptions SET
                purchased_by_user_id = $2,
                status = $3,
                plan_id = $4,
                plan_name = $5,
                current_period_start = $6,
                current_period_end = $7,
                cancel_at_period_end = $8,
                provider = $9,
                polar_subscription_id = $10,
                polar_customer_id = $11,
                revenuecat_app_user_id = $12,
                revenuecat_original_app_user_id = $13,
                updated_at = $14
            WHERE id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, Subscription>(&sql)
            .bind(subscription.id)
            .bind(subscription.purchased_by_user_id)
            .bind(subscription.status.as_str())
            .bind(&subscription.plan_id)
            .bind(&subscription.plan_name)
            .bind(subscription.current_period_start)
            .bind(subscription.current_period_end)
            .bind(subscription.cancel_at_period_end)
            .bind(subscription.provider.as_str())
            .bind(&subscription.polar_subscription_id)
            .bind(&subscription.polar_customer_id)
            .bind(&subscription.revenuecat_app_user_id)
            .bind(&subscription.revenuecat_original_app_user_id)
            .bind(subscription.updated_at)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> BillingResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
