//! Payment provider abstraction for one-off credit purchases.
//!
//! A provider creates gateway orders, verifies the checkout callback and turns
//! gateway webhooks into [`PaymentWebhookEvent`]s. Whatever the path, a paid
//! order ends in [`fulfil_order`], which is idempotent per order.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

use crate::{
    api::models::users::CurrentUser,
    config::PaymentConfig,
    db::{
        errors::DbError,
        handlers::{Payments, Users},
        models::notifications::NotificationCreateDBRequest,
    },
    entitlements::PlanName,
    errors::Error,
    notifications::{NotificationType, notify},
    types::{PaymentId, UserId, abbrev_uuid},
};

pub mod dummy;
pub mod razorpay;

/// Create a payment provider from configuration
pub fn create_provider(config: &PaymentConfig) -> Box<dyn PaymentProvider> {
    match config {
        PaymentConfig::Razorpay(razorpay_config) => Box::new(razorpay::RazorpayProvider::from(razorpay_config.clone())),
        PaymentConfig::Dummy(dummy_config) => Box::new(dummy::DummyProvider::from(dummy_config.clone())),
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("Payment record not found")]
    OrderNotFound { order_id: String },
}

impl From<sqlx::Error> for PaymentError {
    fn from(err: sqlx::Error) -> Self {
        PaymentError::Database(err.into())
    }
}

impl From<PaymentError> for Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::MissingSignature => Error::BadRequest {
                message: "Missing signature".to_string(),
            },
            PaymentError::InvalidData(message) => Error::BadRequest { message },
            PaymentError::InvalidSignature => Error::Forbidden {
                message: "Invalid signature".to_string(),
            },
            PaymentError::OrderNotFound { order_id } => Error::NotFound {
                resource: "Payment".to_string(),
                id: order_id,
            },
            PaymentError::Database(e) => Error::Database(e),
            PaymentError::ProviderApi(message) => Error::Internal {
                operation: format!("payment provider call: {message}"),
            },
        }
    }
}

/// A gateway order the client should complete checkout for
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedOrder {
    pub order_id: String,
    /// Minor units (paise)
    pub amount: i64,
    pub currency: String,
    #[schema(value_type = String, format = "uuid")]
    pub payment_id: PaymentId,
    /// Public key the checkout widget needs, absent for providers without a widget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Result of fulfilling an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Fulfilment {
    pub credits_added: i32,
    /// Credit balance after fulfilment, when the user row was touched
    pub balance: Option<i32>,
    pub already_processed: bool,
}

/// Payment webhook events the system acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentWebhookEvent {
    Captured {
        order_id: String,
        payment_id: String,
    },
    /// Authorized but not yet captured; capture before fulfilling
    Authorized {
        order_id: String,
        payment_id: String,
        amount: i64,
        currency: String,
    },
    Failed {
        order_id: String,
        payment_id: String,
    },
    Ignored {
        event: String,
    },
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a gateway order for one credit pack and record it as `created`
    async fn create_order(&self, db_pool: &PgPool, user: &CurrentUser) -> Result<CreatedOrder>;

    /// Check the checkout callback signature and fulfil the caller's order
    async fn verify_payment(
        &self,
        db_pool: &PgPool,
        user: &CurrentUser,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<Fulfilment>;

    /// Authenticate and parse a webhook. `Ok(None)` means this provider has no webhooks.
    async fn validate_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<Option<PaymentWebhookEvent>>;

    /// Act on a validated webhook event. Safe to call more than once per event.
    async fn process_webhook_event(&self, db_pool: &PgPool, event: &PaymentWebhookEvent) -> Result<()>;
}

/// Mark an order paid and credit its user, exactly once per order.
///
/// The payment row is locked for the duration of the transaction so concurrent
/// callbacks and webhooks for the same order serialise. With `owner` set, orders
/// belonging to someone else are reported as not found.
pub async fn fulfil_order(
    db_pool: &PgPool,
    order_id: &str,
    gateway_payment_id: &str,
    credits: i32,
    owner: Option<UserId>,
) -> Result<Fulfilment> {
    let mut tx = db_pool.begin().await?;

    let payment = Payments::new(&mut tx)
        .lock_by_order_id(order_id)
        .await?
        .filter(|p| owner.is_none_or(|owner| owner == p.user_id))
        .ok_or_else(|| PaymentError::OrderNotFound {
            order_id: order_id.to_string(),
        })?;

    if payment.is_paid() {
        tracing::debug!(order_id = %order_id, "Order already fulfilled, skipping");
        return Ok(Fulfilment {
            credits_added: payment.credits_added,
            balance: None,
            already_processed: true,
        });
    }

    Payments::new(&mut tx).mark_paid(payment.id, gateway_payment_id, credits).await?;
    let mut users = Users::new(&mut tx);
    let balance = users.add_credits(payment.user_id, credits).await?;
    users.set_plan(payment.user_id, PlanName::Flex).await?;
    tx.commit().await?;

    tracing::info!(
        order_id,
        user_id = %abbrev_uuid(&payment.user_id),
        credits,
        "Credit purchase fulfilled"
    );

    let mut conn = db_pool.acquire().await?;
    notify(
        &mut conn,
        NotificationCreateDBRequest::new(
            payment.user_id,
            NotificationType::Success,
            "Payment successful",
            format!("{credits} credits have been added to your account."),
        )
        .with_link("/dashboard")
        .with_metadata(serde_json::json!({ "order_id": order_id, "credits": credits })),
    )
    .await;

    Ok(Fulfilment {
        credits_added: credits,
        balance,
        already_processed: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{handlers::Repository, models::payments::PaymentCreateDBRequest};
    use crate::test_utils::create_test_user;
    use axum::{http::StatusCode, response::IntoResponse};

    async fn create_order(pool: &PgPool, user_id: UserId, order_id: &str) {
        let mut conn = pool.acquire().await.unwrap();
        Payments::new(&mut conn)
            .create(&PaymentCreateDBRequest {
                user_id,
                razorpay_order_id: order_id.to_string(),
                amount: 49_900,
                currency: "INR".to_string(),
            })
            .await
            .unwrap();
    }

    async fn credits(pool: &PgPool, user_id: UserId) -> i32 {
        let mut conn = pool.acquire().await.unwrap();
        Users::new(&mut conn).get_by_id(user_id).await.unwrap().unwrap().credits
    }

    #[test]
    fn payment_errors_map_to_statuses() {
        let cases = [
            (PaymentError::MissingSignature, StatusCode::BAD_REQUEST),
            (PaymentError::InvalidSignature, StatusCode::FORBIDDEN),
            (
                PaymentError::OrderNotFound {
                    order_id: "order_1".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (PaymentError::InvalidData("bad".to_string()), StatusCode::BAD_REQUEST),
            (PaymentError::ProviderApi("down".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let label = err.to_string();
            assert_eq!(Error::from(err).into_response().status(), status, "{label}");
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_fulfil_order_credits_once(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Free).await;
        create_order(&pool, user.id, "order_1").await;

        let first = fulfil_order(&pool, "order_1", "pay_1", 100, Some(user.id)).await.unwrap();
        assert_eq!(
            first,
            Fulfilment {
                credits_added: 100,
                balance: Some(100),
                already_processed: false,
            }
        );

        // Callback and webhook racing for the same order
        let again = fulfil_order(&pool, "order_1", "pay_1", 100, None).await.unwrap();
        assert!(again.already_processed);
        assert_eq!(again.credits_added, 100);
        assert_eq!(credits(&pool, user.id).await, 100);

        let mut conn = pool.acquire().await.unwrap();
        let reloaded = Users::new(&mut conn).get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.plan_name(), PlanName::Flex);
        let payment = Payments::new(&mut conn).get_by_order_id("order_1").await.unwrap().unwrap();
        assert!(payment.is_paid());
        assert_eq!(payment.razorpay_payment_id.as_deref(), Some("pay_1"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_fulfilment_serialises_on_order(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Free).await;
        create_order(&pool, user.id, "order_race").await;

        let (a, b) = tokio::join!(
            fulfil_order(&pool, "order_race", "pay_1", 50, None),
            fulfil_order(&pool, "order_race", "pay_1", 50, None),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(outcomes.iter().filter(|f| !f.already_processed).count(), 1);
        assert_eq!(credits(&pool, user.id).await, 50);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_fulfil_order_hides_other_users_orders(pool: PgPool) {
        let owner = create_test_user(&pool, PlanName::Free).await;
        let intruder = create_test_user(&pool, PlanName::Free).await;
        create_order(&pool, owner.id, "order_2").await;

        let result = fulfil_order(&pool, "order_2", "pay_2", 100, Some(intruder.id)).await;
        assert!(matches!(result, Err(PaymentError::OrderNotFound { .. })));
        let missing = fulfil_order(&pool, "order_missing", "pay_3", 100, None).await;
        assert!(matches!(missing, Err(PaymentError::OrderNotFound { .. })));
        assert_eq!(credits(&pool, owner.id).await, 0);
    }
}
