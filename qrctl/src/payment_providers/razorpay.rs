//! Razorpay provider: orders, checkout signature verification, payment webhooks.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use crate::{
    api::models::users::CurrentUser,
    config::RazorpayConfig,
    db::{handlers::Payments, models::payments::PaymentCreateDBRequest},
    entitlements::PlanName,
    payment_providers::{CreatedOrder, Fulfilment, PaymentError, PaymentProvider, PaymentWebhookEvent, Result, fulfil_order},
    types::{UserId, abbrev_uuid},
    webhooks::signing::{RAZORPAY_SIGNATURE_HEADER, verify_hex},
};

pub struct RazorpayProvider {
    config: RazorpayConfig,
    client: reqwest::Client,
}

impl From<RazorpayConfig> for RazorpayProvider {
    fn from(config: RazorpayConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: String,
    notes: OrderNotes,
}

#[derive(Debug, Serialize)]
struct OrderNotes {
    plan: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct GatewayOrder {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Serialize)]
struct CaptureRequest<'a> {
    amount: i64,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
struct CapturedPayment {
    id: String,
}

impl RazorpayProvider {
    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.config
            .api_base_url
            .join(path)
            .map_err(|e| PaymentError::ProviderApi(format!("invalid Razorpay URL: {e}")))
    }

    async fn post<B: Serialize + Sync, T: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.endpoint(path)?)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(body)
            .send()
            .await
            .map_err(|e| PaymentError::ProviderApi(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PaymentError::ProviderApi(format!("{path} returned {status}: {text}")));
        }

        response.json::<T>().await.map_err(|e| PaymentError::ProviderApi(e.to_string()))
    }

    async fn create_gateway_order(&self, user_id: UserId) -> Result<GatewayOrder> {
        let request = OrderRequest {
            amount: self.config.flex_price_paise,
            currency: &self.config.currency,
            receipt: format!("order_{}", chrono::Utc::now().timestamp_millis()),
            notes: OrderNotes {
                plan: PlanName::Flex.to_string(),
                user_id: user_id.to_string(),
            },
        };
        self.post("/v1/orders", &request).await
    }

    async fn capture(&self, payment_id: &str, amount: i64, currency: &str) -> Result<CapturedPayment> {
        self.post(&format!("/v1/payments/{payment_id}/capture"), &CaptureRequest { amount, currency })
            .await
    }

    /// Checkout callbacks sign `"{order_id}|{payment_id}"` with the API secret
    fn checkout_signature_valid(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_hex(&self.config.key_secret, format!("{order_id}|{payment_id}").as_bytes(), signature)
    }
}

/// Order id of a payment webhook: the order entity wins over the payment's own reference
fn order_id_of(payload: &Value, payment: &Value) -> Option<String> {
    payload
        .pointer("/payload/order/entity/id")
        .or_else(|| payment.get("order_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_payment_event(payload: &Value) -> Result<PaymentWebhookEvent> {
    let event = payload.get("event").and_then(Value::as_str).unwrap_or_default().to_string();

    if !matches!(event.as_str(), "payment.captured" | "payment.authorized" | "payment.failed") {
        return Ok(PaymentWebhookEvent::Ignored { event });
    }

    let payment = payload
        .pointer("/payload/payment/entity")
        .ok_or_else(|| PaymentError::InvalidData(format!("{event} has no payment entity")))?;
    let payment_id = payment
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::InvalidData(format!("{event} payment has no id")))?
        .to_string();
    let order_id = order_id_of(payload, payment).ok_or_else(|| PaymentError::InvalidData(format!("{event} has no order id")))?;

    Ok(match event.as_str() {
        "payment.captured" => PaymentWebhookEvent::Captured { order_id, payment_id },
        "payment.authorized" => PaymentWebhookEvent::Authorized {
            order_id,
            payment_id,
            amount: payment.get("amount").and_then(Value::as_i64).unwrap_or(0),
            currency: payment.get("currency").and_then(Value::as_str).unwrap_or("INR").to_uppercase(),
        },
        _ => PaymentWebhookEvent::Failed { order_id, payment_id },
    })
}

#[async_trait]
impl PaymentProvider for RazorpayProvider {
    #[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id)), err)]
    async fn create_order(&self, db_pool: &PgPool, user: &CurrentUser) -> Result<CreatedOrder> {
        let order = self.create_gateway_order(user.id).await?;

        let mut conn = db_pool.acquire().await?;
        let payment = Payments::new(&mut conn)
            .create(&PaymentCreateDBRequest {
                user_id: user.id,
                razorpay_order_id: order.id.clone(),
                amount: order.amount,
                currency: order.currency.clone(),
            })
            .await?;

        tracing::info!(order_id = %order.id, "Created Razorpay order");
        Ok(CreatedOrder {
            order_id: order.id,
            amount: order.amount,
            currency: order.currency,
            payment_id: payment.id,
            key_id: Some(self.config.key_id.clone()),
        })
    }

    #[tracing::instrument(skip(self, db_pool, user, signature), fields(user_id = %abbrev_uuid(&user.id)), err)]
    async fn verify_payment(
        &self,
        db_pool: &PgPool,
        user: &CurrentUser,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<Fulfilment> {
        if !self.checkout_signature_valid(order_id, payment_id, signature) {
            tracing::warn!("Invalid Razorpay checkout signature");
            return Err(PaymentError::InvalidSignature);
        }
        fulfil_order(db_pool, order_id, payment_id, self.config.credits_per_purchase, Some(user.id)).await
    }

    async fn validate_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<Option<PaymentWebhookEvent>> {
        let signature = headers
            .get(RAZORPAY_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(PaymentError::MissingSignature)?;

        if !verify_hex(&self.config.webhook_secret, body, signature) {
            return Err(PaymentError::InvalidSignature);
        }

        let payload: Value = serde_json::from_slice(body).map_err(|e| PaymentError::InvalidData(format!("Invalid JSON body: {e}")))?;
        parse_payment_event(&payload).map(Some)
    }

    #[tracing::instrument(skip_all, err)]
    async fn process_webhook_event(&self, db_pool: &PgPool, event: &PaymentWebhookEvent) -> Result<()> {
        let credits = self.config.credits_per_purchase;
        match event {
            PaymentWebhookEvent::Captured { order_id, payment_id } => {
                fulfil_order(db_pool, order_id, payment_id, credits, None).await?;
            }
            PaymentWebhookEvent::Authorized {
                order_id,
                payment_id,
                amount,
                currency,
            } => {
                let mut conn = db_pool.acquire().await?;
                let payment = Payments::new(&mut conn)
                    .get_by_order_id(order_id)
                    .await?
                    .ok_or_else(|| PaymentError::OrderNotFound {
                        order_id: order_id.clone(),
                    })?;
                drop(conn);
                if payment.is_paid() {
                    return Ok(());
                }

                let captured = self.capture(payment_id, *amount, currency).await?;
                tracing::info!(payment_id = %captured.id, "Captured authorized payment");
                fulfil_order(db_pool, order_id, &captured.id, credits, None).await?;
            }
            PaymentWebhookEvent::Failed { order_id, payment_id } => {
                let mut conn = db_pool.acquire().await?;
                if Payments::new(&mut conn).mark_failed(order_id, Some(payment_id)).await? {
                    tracing::info!(order_id = %order_id, "Payment marked failed");
                }
            }
            PaymentWebhookEvent::Ignored { event } => {
                tracing::debug!(event = %event, "Ignoring payment webhook event");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::install_crypto_provider;
    use crate::webhooks::signing::sign_hex;
    use axum::http::HeaderValue;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header_exists, method, path},
    };

    fn provider(base: &str) -> RazorpayProvider {
        RazorpayProvider::from(RazorpayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: "key_secret".to_string(),
            webhook_secret: "hook_secret".to_string(),
            subscription_webhook_secret: None,
            api_base_url: base.parse().unwrap(),
            flex_price_paise: 30_000,
            currency: "INR".to_string(),
            credits_per_purchase: 100,
        })
    }

    fn signed_headers(secret: &str, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RAZORPAY_SIGNATURE_HEADER, HeaderValue::from_str(&sign_hex(secret, body)).unwrap());
        headers
    }

    #[tokio::test]
    async fn create_gateway_order_posts_flex_notes() {
        install_crypto_provider();
        let server = MockServer::start().await;
        let user = uuid::Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({
                "amount": 30000,
                "currency": "INR",
                "notes": {"plan": "FLEX", "user_id": user.to_string()}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "order_abc",
                "amount": 30000,
                "currency": "INR",
                "status": "created"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let order = provider(&server.uri()).create_gateway_order(user).await.unwrap();
        assert_eq!(order.id, "order_abc");
        assert_eq!(order.amount, 30000);
    }

    #[tokio::test]
    async fn gateway_errors_surface_as_provider_api() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments/pay_1/capture"))
            .respond_with(ResponseTemplate::new(400).set_body_string("already captured"))
            .mount(&server)
            .await;

        let err = provider(&server.uri()).capture("pay_1", 30000, "INR").await.unwrap_err();
        match err {
            PaymentError::ProviderApi(message) => assert!(message.contains("already captured")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn checkout_signature_covers_order_and_payment() {
        let p = provider("http://localhost");
        let good = sign_hex("key_secret", b"order_1|pay_1");
        assert!(p.checkout_signature_valid("order_1", "pay_1", &good));
        assert!(!p.checkout_signature_valid("order_1", "pay_2", &good));
        assert!(!p.checkout_signature_valid("order_1", "pay_1", "deadbeef"));
    }

    #[tokio::test]
    async fn webhook_requires_valid_signature() {
        let p = provider("http://localhost");
        let body = br#"{"event":"payment.captured"}"#;

        assert!(matches!(
            p.validate_webhook(&HeaderMap::new(), body).await,
            Err(PaymentError::MissingSignature)
        ));
        assert!(matches!(
            p.validate_webhook(&signed_headers("wrong", body), body).await,
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn webhook_parses_payment_events() {
        let p = provider("http://localhost");

        let captured = json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_1", "order_id": "order_1"}}}
        })
        .to_string();
        let event = p
            .validate_webhook(&signed_headers("hook_secret", captured.as_bytes()), captured.as_bytes())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(PaymentWebhookEvent::Captured {
                order_id: "order_1".to_string(),
                payment_id: "pay_1".to_string()
            })
        );

        let authorized = json!({
            "event": "payment.authorized",
            "payload": {
                "payment": {"entity": {"id": "pay_2", "amount": 30000, "currency": "inr", "order_id": "stale"}},
                "order": {"entity": {"id": "order_2"}}
            }
        })
        .to_string();
        let event = p
            .validate_webhook(&signed_headers("hook_secret", authorized.as_bytes()), authorized.as_bytes())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(PaymentWebhookEvent::Authorized {
                order_id: "order_2".to_string(),
                payment_id: "pay_2".to_string(),
                amount: 30000,
                currency: "INR".to_string(),
            })
        );
    }

    #[test]
    fn other_events_are_ignored() {
        let event = parse_payment_event(&json!({"event": "refund.created"})).unwrap();
        assert_eq!(
            event,
            PaymentWebhookEvent::Ignored {
                event: "refund.created".to_string()
            }
        );
        assert!(parse_payment_event(&json!({"event": "payment.captured", "payload": {}})).is_err());
    }
}
