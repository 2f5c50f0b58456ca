//! HTTP handlers for one-off credit purchases.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{
    AppState,
    api::models::{
        billing::WebhookAck,
        payments::{PaymentStatusQuery, PaymentStatusResponse, VerifyPaymentRequest},
        users::CurrentUser,
    },
    db::handlers::Payments,
    errors::Error,
    payment_providers::{CreatedOrder, Fulfilment, PaymentWebhookEvent},
};

fn no_provider() -> Response {
    tracing::warn!("Payment endpoint called but no payment provider is configured");
    (StatusCode::NOT_IMPLEMENTED, Json(json!({ "error": "No payment provider configured" }))).into_response()
}

/// Create an order for one credit pack
#[utoipa::path(
    post,
    path = "/payments/create-order",
    tag = "payments",
    responses(
        (status = 200, description = "Order created", body = CreatedOrder),
        (status = 501, description = "No payment provider configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_order(State(state): State<AppState>, current_user: CurrentUser) -> Result<Response, Error> {
    let Some(provider) = state.payment_provider.as_ref() else {
        return Ok(no_provider());
    };
    let order = provider.create_order(&state.db, &current_user).await?;
    Ok(Json(order).into_response())
}

/// Verify the checkout callback and credit the caller
#[utoipa::path(
    post,
    path = "/payments/verify",
    tag = "payments",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified", body = Fulfilment),
        (status = 403, description = "Invalid signature"),
        (status = 404, description = "Unknown order"),
        (status = 501, description = "No payment provider configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_payment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Response, Error> {
    let Some(provider) = state.payment_provider.as_ref() else {
        return Ok(no_provider());
    };
    let fulfilment = provider
        .verify_payment(
            &state.db,
            &current_user,
            &request.razorpay_order_id,
            &request.razorpay_payment_id,
            &request.razorpay_signature,
        )
        .await?;
    Ok(Json(fulfilment).into_response())
}

/// Status of one of the caller's orders
#[utoipa::path(
    get,
    path = "/payments/status",
    tag = "payments",
    params(PaymentStatusQuery),
    responses(
        (status = 200, body = PaymentStatusResponse),
        (status = 400, description = "Missing order_id"),
        (status = 404, description = "Unknown order"),
        (status = 501, description = "No payment provider configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn payment_status(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<PaymentStatusQuery>,
) -> Result<Response, Error> {
    if state.payment_provider.is_none() {
        return Ok(no_provider());
    }
    let Some(order_id) = query.order_id.filter(|id| !id.trim().is_empty()) else {
        return Err(Error::BadRequest {
            message: "order_id is required".to_string(),
        });
    };

    let mut conn = state.db.acquire().await?;
    let payment = Payments::new(&mut conn)
        .get_by_order_id(&order_id)
        .await?
        .filter(|p| p.user_id == current_user.id)
        .ok_or_else(|| Error::NotFound {
            resource: "Payment".to_string(),
            id: order_id.clone(),
        })?;

    Ok(Json(PaymentStatusResponse {
        paid: payment.is_paid(),
        status: payment.status,
        credits: payment.credits_added,
    })
    .into_response())
}

/// Payment gateway webhook
#[utoipa::path(
    post,
    path = "/webhooks/payments",
    tag = "payments",
    request_body(content = String, content_type = "application/json", description = "Raw Razorpay payment event, signed with X-Razorpay-Signature"),
    responses(
        (status = 200, body = WebhookAck),
        (status = 400, description = "Missing signature"),
        (status = 403, description = "Invalid signature"),
        (status = 404, description = "Unknown order"),
        (status = 501, description = "No payment provider configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn payment_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, Error> {
    let Some(provider) = state.payment_provider.as_ref() else {
        return Ok(no_provider());
    };

    let Some(event) = provider.validate_webhook(&headers, &body).await? else {
        return Ok(Json(WebhookAck::ok()).into_response());
    };

    if let PaymentWebhookEvent::Ignored { event } = &event {
        tracing::debug!(event = %event, "Ignoring payment webhook event");
    } else {
        provider.process_webhook_event(&state.db, &event).await?;
    }
    Ok(Json(WebhookAck::ok()).into_response())
}

#[cfg(test)]
mod tests {
    use crate::config::{DummyConfig, PaymentConfig};
    use crate::test_utils::{create_test_config, create_test_server, create_test_state, create_test_state_with_config};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn webhook_without_provider_is_not_implemented() {
        let server = create_test_server(create_test_state());
        let response = server.post("/webhooks/payments").bytes("{}".into()).await;
        response.assert_status(StatusCode::NOT_IMPLEMENTED);
        response.assert_json(&json!({ "error": "No payment provider configured" }));
    }

    #[tokio::test]
    async fn dummy_provider_has_no_webhooks() {
        let mut config = create_test_config();
        config.payment = Some(PaymentConfig::Dummy(DummyConfig { credits_per_purchase: 100 }));
        let server = create_test_server(create_test_state_with_config(config));
        let response = server.post("/webhooks/payments").bytes("{}".into()).await;
        response.assert_status_ok();
        response.assert_json(&json!({ "ok": true }));
    }
}
