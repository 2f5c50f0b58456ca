//! Database repository for one-off credit purchases.

use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::Result,
    models::payments::{PaymentCreateDBRequest, PaymentDBResponse, PaymentStatus},
};
use crate::types::{PaymentId, abbrev_uuid};

pub struct Payments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Payments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), order_id = %request.razorpay_order_id), err)]
    pub async fn create(&mut self, request: &PaymentCreateDBRequest) -> Result<PaymentDBResponse> {
        let payment = sqlx::query_as::<_, PaymentDBResponse>(
            r#"
            INSERT INTO payments (id, user_id, razorpay_order_id, amount, currency, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.razorpay_order_id)
        .bind(request.amount)
        .bind(&request.currency)
        .bind(PaymentStatus::Created.as_str())
        .fetch_one(&mut *self.db)
        .await?;
        Ok(payment)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_order_id(&mut self, order_id: &str) -> Result<Option<PaymentDBResponse>> {
        let payment = sqlx::query_as::<_, PaymentDBResponse>("SELECT * FROM payments WHERE razorpay_order_id = $1")
            .bind(order_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(payment)
    }

    /// Locks the payment row until the surrounding transaction ends
    #[instrument(skip(self), err)]
    pub async fn lock_by_order_id(&mut self, order_id: &str) -> Result<Option<PaymentDBResponse>> {
        let payment = sqlx::query_as::<_, PaymentDBResponse>("SELECT * FROM payments WHERE razorpay_order_id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(payment)
    }

    #[instrument(skip(self), fields(payment_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_paid(&mut self, id: PaymentId, gateway_payment_id: &str, credits_added: i32) -> Result<PaymentDBResponse> {
        let payment = sqlx::query_as::<_, PaymentDBResponse>(
            r#"
            UPDATE payments SET
                status = $2,
                razorpay_payment_id = $3,
                credits_added = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(PaymentStatus::Paid.as_str())
        .bind(gateway_payment_id)
        .bind(credits_added)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(payment)
    }

    #[instrument(skip(self), err)]
    pub async fn mark_failed(&mut self, order_id: &str, gateway_payment_id: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = $2,
                razorpay_payment_id = COALESCE($3, razorpay_payment_id),
                updated_at = NOW()
            WHERE razorpay_order_id = $1 AND status = 'created'
            "#,
        )
        .bind(order_id)
        .bind(PaymentStatus::Failed.as_str())
        .bind(gateway_payment_id)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
