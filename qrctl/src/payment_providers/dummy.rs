//! Dummy payment provider for development.
//!
//! Orders are recorded like real ones but complete instantly: `verify_payment`
//! accepts any signature and fulfils the order. There are no webhooks.

use async_trait::async_trait;
use axum::http::HeaderMap;
use sqlx::PgPool;

use crate::{
    api::models::users::CurrentUser,
    config::DummyConfig,
    db::{handlers::Payments, models::payments::PaymentCreateDBRequest},
    payment_providers::{CreatedOrder, Fulfilment, PaymentProvider, PaymentWebhookEvent, Result, fulfil_order},
};

/// Nominal price recorded against dummy orders, in paise
const DUMMY_AMOUNT: i64 = 0;

pub struct DummyProvider {
    credits_per_purchase: i32,
}

impl From<DummyConfig> for DummyProvider {
    fn from(config: DummyConfig) -> Self {
        Self {
            credits_per_purchase: config.credits_per_purchase,
        }
    }
}

/// Order ids carry a random suffix so they never collide with gateway ids
pub(crate) fn dummy_order_id() -> String {
    format!("dummy_order_{}", uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    async fn create_order(&self, db_pool: &PgPool, user: &CurrentUser) -> Result<CreatedOrder> {
        let order_id = dummy_order_id();

        let mut conn = db_pool.acquire().await?;
        let payment = Payments::new(&mut conn)
            .create(&PaymentCreateDBRequest {
                user_id: user.id,
                razorpay_order_id: order_id.clone(),
                amount: DUMMY_AMOUNT,
                currency: "INR".to_string(),
            })
            .await?;
        drop(conn);

        // Dummy orders are paid the moment they exist
        fulfil_order(db_pool, &order_id, &format!("dummy_payment_{}", payment.id.simple()), self.credits_per_purchase, Some(user.id)).await?;
        tracing::info!(order_id = %order_id, "Dummy provider created and fulfilled order");

        Ok(CreatedOrder {
            order_id,
            amount: DUMMY_AMOUNT,
            currency: "INR".to_string(),
            payment_id: payment.id,
            key_id: None,
        })
    }

    async fn verify_payment(
        &self,
        db_pool: &PgPool,
        user: &CurrentUser,
        order_id: &str,
        payment_id: &str,
        _signature: &str,
    ) -> Result<Fulfilment> {
        fulfil_order(db_pool, order_id, payment_id, self.credits_per_purchase, Some(user.id)).await
    }

    async fn validate_webhook(&self, _headers: &HeaderMap, _body: &[u8]) -> Result<Option<PaymentWebhookEvent>> {
        Ok(None)
    }

    async fn process_webhook_event(&self, _db_pool: &PgPool, _event: &PaymentWebhookEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_are_prefixed_and_unique() {
        let a = dummy_order_id();
        let b = dummy_order_id();
        assert!(a.starts_with("dummy_order_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn has_no_webhooks() {
        let provider = DummyProvider::from(DummyConfig { credits_per_purchase: 100 });
        assert!(provider.validate_webhook(&HeaderMap::new(), b"{}").await.unwrap().is_none());
    }
}
