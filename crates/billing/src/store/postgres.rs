//! Postgres adapter

use async_trait::async_trait;
use bazaar_shared::{PlanId, SellerId, SubscriptionStatus};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{BillingStore, SellerSubscription};
use crate::error::{BillingError, BillingResult};
use crate::projection::ProfileProjection;

const SUBSCRIPTION_COLUMNS: &str = "seller_id, provider, plan_id, status, \
     external_customer_ref, external_subscription_ref, original_customer_ref, price_ref, \
     period_start, period_end, trial_end, cancel_at_period_end, updated_at";

/// Row as stored; enums are VARCHAR columns guarded by CHECK constraints
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRecord {
    seller_id: Uuid,
    provider: String,
    plan_id: String,
    status: String,
    external_customer_ref: String,
    external_subscription_ref: Option<String>,
    original_customer_ref: Option<String>,
    price_ref: Option<String>,
    period_start: Option<OffsetDateTime>,
    period_end: Option<OffsetDateTime>,
    trial_end: Option<OffsetDateTime>,
    cancel_at_period_end: bool,
    updated_at: OffsetDateTime,
}

impl TryFrom<SubscriptionRecord> for SellerSubscription {
    type Error = BillingError;

    fn try_from(record: SubscriptionRecord) -> Result<Self, Self::Error> {
        let corrupt = |e: bazaar_shared::UnknownVariant| {
            BillingError::Database(format!("corrupt seller_subscriptions row: {}", e))
        };

        Ok(Self {
            seller_id: SellerId(record.seller_id),
            provider: record.provider.parse().map_err(corrupt)?,
            plan_id: record.plan_id.parse().map_err(corrupt)?,
            status: record.status.parse().map_err(corrupt)?,
            external_customer_ref: record.external_customer_ref,
            external_subscription_ref: record.external_subscription_ref,
            original_customer_ref: record.original_customer_ref,
            price_ref: record.price_ref,
            period_start: record.period_start,
            period_end: record.period_end,
            trial_end: record.trial_end,
            cancel_at_period_end: record.cancel_at_period_end,
            updated_at: record.updated_at,
        })
    }
}

/// `BillingStore` over the shared Postgres pool
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn find_seller_by_stripe_customer(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<SellerId>> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM profiles WHERE stripe_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| SellerId(id)))
    }

    async fn find_seller_by_rc_app_user(
        &self,
        app_user_id: &str,
    ) -> BillingResult<Option<SellerId>> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM profiles WHERE rc_app_user_id = $1")
                .bind(app_user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| SellerId(id)))
    }

    async fn upsert_subscription(
        &self,
        subscription: &SellerSubscription,
    ) -> BillingResult<SellerSubscription> {
        // Last write wins for every column except updated_at, which never moves back
        let sql = format!(
            r#"
            INSERT INTO seller_subscriptions ({SUBSCRIPTION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (seller_id, provider) DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                status = EXCLUDED.status,
                external_customer_ref = EXCLUDED.external_customer_ref,
                external_subscription_ref = EXCLUDED.external_subscription_ref,
                original_customer_ref = EXCLUDED.original_customer_ref,
                price_ref = EXCLUDED.price_ref,
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                trial_end = EXCLUDED.trial_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                updated_at = GREATEST(seller_subscriptions.updated_at, EXCLUDED.updated_at)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );

        let record: SubscriptionRecord = sqlx::query_as(&sql)
            .bind(subscription.seller_id.0)
            .bind(subscription.provider.as_str())
            .bind(subscription.plan_id.as_str())
            .bind(subscription.status.as_str())
            .bind(&subscription.external_customer_ref)
            .bind(&subscription.external_subscription_ref)
            .bind(&subscription.original_customer_ref)
            .bind(&subscription.price_ref)
            .bind(subscription.period_start)
            .bind(subscription.period_end)
            .bind(subscription.trial_end)
            .bind(subscription.cancel_at_period_end)
            .bind(subscription.updated_at)
            .fetch_one(&self.pool)
            .await?;

        record.try_into()
    }

    async fn list_subscriptions(
        &self,
        seller_id: SellerId,
    ) -> BillingResult<Vec<SellerSubscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM seller_subscriptions \
             WHERE seller_id = $1 ORDER BY provider"
        );

        let records: Vec<SubscriptionRecord> = sqlx::query_as(&sql)
            .bind(seller_id.0)
            .fetch_all(&self.pool)
            .await?;

        records.into_iter().map(TryInto::try_into).collect()
    }

    async fn write_projection(
        &self,
        seller_id: SellerId,
        projection: &ProfileProjection,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET active_plan_id = $1,
                subscription_status = $2,
                projection_updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(projection.active_plan_id.as_str())
        .bind(projection.subscription_status.map(|s| s.as_str()))
        .bind(seller_id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::Database(format!(
                "profile {} not found",
                seller_id
            )));
        }

        Ok(())
    }

    async fn read_projection(
        &self,
        seller_id: SellerId,
    ) -> BillingResult<Option<ProfileProjection>> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT active_plan_id, subscription_status FROM profiles WHERE id = $1",
        )
        .bind(seller_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some((plan, status)) = row else {
            return Ok(None);
        };

        let active_plan_id: PlanId = plan
            .parse()
            .map_err(|e| BillingError::Database(format!("corrupt profile projection: {}", e)))?;
        let subscription_status = status
            .map(|s| s.parse::<SubscriptionStatus>())
            .transpose()
            .map_err(|e| BillingError::Database(format!("corrupt profile projection: {}", e)))?;

        Ok(Some(ProfileProjection {
            active_plan_id,
            subscription_status,
        }))
    }

    async fn list_seller_ids(&self) -> BillingResult<Vec<SellerId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT seller_id FROM seller_subscriptions ORDER BY seller_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| SellerId(id)).collect())
    }

    async fn ping(&self) -> BillingResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
