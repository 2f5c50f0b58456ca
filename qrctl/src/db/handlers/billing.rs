//! Database repository for subscriptions, invoices, webhook idempotency markers
//! and manual billing adjustments.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::billing::SubscriptionStatus;
use crate::db::{
    errors::{DbError, Result},
    models::billing::{
        BillingAdjustmentCreateDBRequest, BillingAdjustmentDBResponse, InvoiceCreateDBRequest, InvoiceDBResponse,
        SubscriptionCreateDBRequest, SubscriptionDBResponse,
    },
};
use crate::types::{SubscriptionId, UserId, abbrev_uuid};

pub struct Billing<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Billing<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Records a gateway event id. Returns `false` if it was already recorded.
    #[instrument(skip(self), err)]
    pub async fn record_webhook_event(&mut self, gateway: &str, event_id: &str) -> Result<bool> {
        let result = sqlx::query("INSERT INTO webhook_idempotency (gateway, event_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(gateway)
            .bind(event_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Latest subscription that is active, trialing or past due
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn active_subscription(&mut self, user_id: UserId) -> Result<Option<SubscriptionDBResponse>> {
        let live: Vec<&str> = SubscriptionStatus::LIVE.iter().map(|s| s.as_str()).collect();
        let sub = sqlx::query_as::<_, SubscriptionDBResponse>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND status = ANY($2)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(&live)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(sub)
    }

    #[instrument(skip(self), err)]
    pub async fn get_subscription_by_gateway_id(&mut self, gateway_subscription_id: &str) -> Result<Option<SubscriptionDBResponse>> {
        let sub = sqlx::query_as::<_, SubscriptionDBResponse>("SELECT * FROM subscriptions WHERE gateway_subscription_id = $1")
            .bind(gateway_subscription_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(sub)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    pub async fn create_subscription(&mut self, request: &SubscriptionCreateDBRequest) -> Result<SubscriptionDBResponse> {
        let sub = sqlx::query_as::<_, SubscriptionDBResponse>(
            r#"
            INSERT INTO subscriptions (
                id, user_id, gateway, gateway_subscription_id, plan, status,
                current_period_start, current_period_end, grace_until, canceled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.gateway)
        .bind(&request.gateway_subscription_id)
        .bind(&request.plan)
        .bind(request.status.as_str())
        .bind(request.current_period_start)
        .bind(request.current_period_end)
        .bind(request.grace_until)
        .bind(request.canceled_at)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(sub)
    }

    /// Moves a subscription to a new status. Period bounds and `canceled_at` are
    /// only overwritten when given; `grace_until` is always replaced.
    #[instrument(skip(self), fields(subscription_id = %abbrev_uuid(&id), status = %status), err)]
    pub async fn transition_subscription(
        &mut self,
        id: SubscriptionId,
        status: SubscriptionStatus,
        current_period_start: Option<DateTime<Utc>>,
        current_period_end: Option<DateTime<Utc>>,
        grace_until: Option<DateTime<Utc>>,
        canceled_at: Option<DateTime<Utc>>,
    ) -> Result<SubscriptionDBResponse> {
        let sub = sqlx::query_as::<_, SubscriptionDBResponse>(
            r#"
            UPDATE subscriptions SET
                status = $2,
                current_period_start = COALESCE($3, current_period_start),
                current_period_end = COALESCE($4, current_period_end),
                grace_until = $5,
                canceled_at = COALESCE($6, canceled_at),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(current_period_start)
        .bind(current_period_end)
        .bind(grace_until)
        .bind(canceled_at)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(sub)
    }

    /// Inserts an invoice; a redelivered invoice id is a no-op returning `None`
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    pub async fn create_invoice(&mut self, request: &InvoiceCreateDBRequest) -> Result<Option<InvoiceDBResponse>> {
        let invoice = sqlx::query_as::<_, InvoiceDBResponse>(
            r#"
            INSERT INTO invoices (id, user_id, gateway, gateway_invoice_id, amount_cents, currency, status, pdf_url, paid_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (gateway_invoice_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.gateway)
        .bind(&request.gateway_invoice_id)
        .bind(request.amount_cents)
        .bind(&request.currency)
        .bind(&request.status)
        .bind(&request.pdf_url)
        .bind(request.paid_at)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(invoice)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_invoices(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<InvoiceDBResponse>> {
        let invoices = sqlx::query_as::<_, InvoiceDBResponse>(
            "SELECT * FROM invoices WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(invoices)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn count_invoices(&mut self, user_id: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM invoices WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    /// Sum of paid invoices, in the smallest currency unit
    #[instrument(skip(self), err)]
    pub async fn paid_revenue_cents(&mut self) -> Result<i64> {
        let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM invoices WHERE status = 'paid'")
            .fetch_one(&mut *self.db)
            .await?;
        Ok(total)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    pub async fn create_adjustment(&mut self, request: &BillingAdjustmentCreateDBRequest) -> Result<BillingAdjustmentDBResponse> {
        let adjustment = sqlx::query_as::<_, BillingAdjustmentDBResponse>(
            r#"
            INSERT INTO billing_adjustments (id, user_id, adjustment_type, amount_cents, plan, reason, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.adjustment_type)
        .bind(request.amount_cents)
        .bind(&request.plan)
        .bind(&request.reason)
        .bind(request.created_by)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(adjustment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::PlanName;
    use crate::test_utils::create_test_user;
    use sqlx::{Acquire, PgPool};

    fn subscription(user_id: UserId, gateway_subscription_id: &str, status: SubscriptionStatus) -> SubscriptionCreateDBRequest {
        SubscriptionCreateDBRequest {
            user_id,
            gateway: "razorpay".to_string(),
            gateway_subscription_id: gateway_subscription_id.to_string(),
            plan: PlanName::Pro.to_string(),
            status,
            current_period_start: None,
            current_period_end: None,
            grace_until: None,
            canceled_at: None,
        }
    }

    fn invoice(user_id: UserId, gateway_invoice_id: &str, amount_cents: i64) -> InvoiceCreateDBRequest {
        InvoiceCreateDBRequest {
            user_id,
            gateway: "razorpay".to_string(),
            gateway_invoice_id: gateway_invoice_id.to_string(),
            amount_cents,
            currency: "INR".to_string(),
            status: "paid".to_string(),
            pdf_url: None,
            paid_at: Some(Utc::now()),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_webhook_event_recorded_exactly_once(pool: PgPool) {
        let mut tx = pool.begin().await.unwrap();
        let mut billing = Billing::new(tx.acquire().await.unwrap());

        assert!(billing.record_webhook_event("razorpay", "evt_1").await.unwrap());
        assert!(!billing.record_webhook_event("razorpay", "evt_1").await.unwrap());
        assert!(billing.record_webhook_event("other", "evt_1").await.unwrap());

        // A duplicate leaves the surrounding transaction usable
        assert!(billing.record_webhook_event("razorpay", "evt_2").await.unwrap());
        tx.commit().await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM webhook_idempotency").fetch_one(&pool).await.unwrap();
        assert_eq!(rows, 3);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_active_subscription_ignores_canceled(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Pro).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut billing = Billing::new(&mut conn);

        let sub = billing
            .create_subscription(&subscription(user.id, "sub_1", SubscriptionStatus::Active))
            .await
            .unwrap();
        assert_eq!(billing.active_subscription(user.id).await.unwrap().map(|s| s.id), Some(sub.id));

        let grace = Utc::now() + chrono::Duration::days(3);
        let past_due = billing
            .transition_subscription(sub.id, SubscriptionStatus::PastDue, None, None, Some(grace), None)
            .await
            .unwrap();
        assert_eq!(past_due.status(), SubscriptionStatus::PastDue);
        assert!(billing.active_subscription(user.id).await.unwrap().is_some());

        let canceled = billing
            .transition_subscription(sub.id, SubscriptionStatus::Canceled, None, None, None, Some(Utc::now()))
            .await
            .unwrap();
        assert_eq!(canceled.grace_until, None);
        assert!(canceled.canceled_at.is_some());
        assert!(billing.active_subscription(user.id).await.unwrap().is_none());

        let missing = billing
            .transition_subscription(uuid::Uuid::new_v4(), SubscriptionStatus::Active, None, None, None, None)
            .await;
        assert!(matches!(missing, Err(DbError::NotFound)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_redelivered_invoice_is_not_duplicated(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Pro).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut billing = Billing::new(&mut conn);

        assert!(billing.create_invoice(&invoice(user.id, "inv_1", 99_900)).await.unwrap().is_some());
        assert!(billing.create_invoice(&invoice(user.id, "inv_1", 99_900)).await.unwrap().is_none());
        billing.create_invoice(&invoice(user.id, "inv_2", 49_900)).await.unwrap();

        assert_eq!(billing.count_invoices(user.id).await.unwrap(), 2);
        assert_eq!(billing.paid_revenue_cents().await.unwrap(), 149_800);
        let page = billing.list_invoices(user.id, 0, 1).await.unwrap();
        assert_eq!(page.len(), 1);
    }
}
