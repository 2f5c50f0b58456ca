//! Subscription state, access checks, invoices and the subscription webhook.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    AppState,
    api::models::{
        billing::{CreditsResponse, InvoiceResponse, SubscriptionOverview, SubscriptionResponse, WebhookAck},
        pagination::{PaginatedResponse, Pagination},
        users::CurrentUser,
    },
    billing::{
        BillingAccess, SubscriptionState, check_billing_access,
        reconcile::{ReconcileOutcome, event_id, parse_billing_event, reconcile},
    },
    credits::{qr_capacity_from_credits, total_credits_used},
    db::handlers::{Billing, QrCodes},
    errors::{Error, Result},
    webhooks::signing::{RAZORPAY_SIGNATURE_HEADER, verify_hex},
};

/// Access for a user, failing open when the lookup itself fails
async fn resolve_access(state: &AppState, user: &CurrentUser) -> BillingAccess {
    let lookup = async {
        let mut conn = state.db.acquire().await?;
        Ok::<_, Error>(Billing::new(&mut conn).active_subscription(user.id).await?)
    };
    match lookup.await {
        Ok(sub) => check_billing_access(sub.as_ref().map(SubscriptionState::from).as_ref(), Utc::now()),
        Err(e) => {
            warn!(error = %e, "Billing access lookup failed; allowing request");
            BillingAccess::allowed()
        }
    }
}

#[utoipa::path(
    get,
    path = "/billing/subscription",
    tag = "billing",
    responses((status = 200, body = SubscriptionOverview), (status = 401, description = "Not authenticated"))
)]
#[tracing::instrument(skip_all)]
pub async fn get_subscription(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<SubscriptionOverview>> {
    let mut conn = state.db.acquire().await?;
    let subscription = Billing::new(&mut conn).active_subscription(current_user.id).await?;
    let access = check_billing_access(subscription.as_ref().map(SubscriptionState::from).as_ref(), Utc::now());

    Ok(Json(SubscriptionOverview {
        plan: current_user.plan,
        subscription: subscription.map(SubscriptionResponse::from),
        entitlements: current_user.plan.entitlements().clone(),
        access,
    }))
}

#[utoipa::path(
    get,
    path = "/billing/access",
    tag = "billing",
    responses((status = 200, body = BillingAccess), (status = 401, description = "Not authenticated"))
)]
#[tracing::instrument(skip_all)]
pub async fn get_access(State(state): State<AppState>, current_user: CurrentUser) -> Json<BillingAccess> {
    Json(resolve_access(&state, &current_user).await)
}

#[utoipa::path(
    get,
    path = "/billing/invoices",
    tag = "billing",
    params(Pagination),
    responses((status = 200, body = PaginatedResponse<InvoiceResponse>), (status = 401, description = "Not authenticated"))
)]
#[tracing::instrument(skip_all)]
pub async fn list_invoices(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<InvoiceResponse>>> {
    let (offset, limit) = pagination.params();
    let mut conn = state.db.acquire().await?;
    let mut billing = Billing::new(&mut conn);
    let invoices = billing.list_invoices(current_user.id, offset, limit).await?;
    let total = billing.count_invoices(current_user.id).await?;

    Ok(Json(PaginatedResponse::new(
        invoices.into_iter().map(InvoiceResponse::from).collect(),
        total,
        offset,
        limit,
    )))
}

/// Credit balance and what it buys
#[utoipa::path(
    get,
    path = "/user/credits",
    tag = "billing",
    responses((status = 200, body = CreditsResponse), (status = 401, description = "Not authenticated"))
)]
#[tracing::instrument(skip_all)]
pub async fn get_credits(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<CreditsResponse>> {
    let mut conn = state.db.acquire().await?;
    let codes = QrCodes::new(&mut conn).list_all_for_user(current_user.id).await?;
    let inputs: Vec<_> = codes.iter().map(|qr| qr.credit_input()).collect();

    Ok(Json(CreditsResponse {
        credits: current_user.credits,
        plan: current_user.plan,
        total_used: total_credits_used(&inputs),
        capacity: qr_capacity_from_credits(i64::from(current_user.credits)),
    }))
}

/// Razorpay subscription lifecycle events
#[utoipa::path(
    post,
    path = "/webhooks/billing",
    tag = "billing",
    request_body(content = String, content_type = "application/json", description = "Raw Razorpay subscription event, signed with X-Razorpay-Signature"),
    responses(
        (status = 200, body = WebhookAck),
        (status = 400, description = "Malformed payload"),
        (status = 403, description = "Missing or invalid signature"),
        (status = 503, description = "Subscription webhooks are not configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn billing_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<WebhookAck>> {
    let Some(secret) = state.config.billing_webhook_secret() else {
        return Err(Error::ServiceUnavailable {
            message: "Subscription webhooks are not configured".to_string(),
        });
    };

    let signature = headers.get(RAZORPAY_SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !signature.is_some_and(|sig| verify_hex(secret, &body, sig)) {
        counter!("qrctl_billing_webhooks_total", "outcome" => "bad_signature").increment(1);
        return Err(Error::Forbidden {
            message: "Invalid webhook signature".to_string(),
        });
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|e| Error::BadRequest {
        message: format!("Invalid webhook payload: {e}"),
    })?;
    let now = Utc::now();
    let id = event_id(&payload);
    let event = parse_billing_event(&payload, now)?;

    match reconcile(&state.db, state.email.as_deref(), &id, event, now).await? {
        ReconcileOutcome::Applied => {
            counter!("qrctl_billing_webhooks_total", "outcome" => "applied").increment(1);
            info!(event_id = %id, "Billing webhook applied");
            Ok(Json(WebhookAck::ok()))
        }
        ReconcileOutcome::Duplicate => {
            counter!("qrctl_billing_webhooks_total", "outcome" => "duplicate").increment(1);
            Ok(Json(WebhookAck::duplicate()))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{PaymentConfig, RazorpayConfig};
    use crate::test_utils::{create_test_config, create_test_server, create_test_state, create_test_state_with_config};
    use crate::webhooks::signing::sign_hex;
    use axum::http::StatusCode;

    fn razorpay_state() -> crate::AppState {
        let mut config = create_test_config();
        config.payment = Some(PaymentConfig::Razorpay(RazorpayConfig {
            key_id: "rzp_test".to_string(),
            key_secret: "key-secret".to_string(),
            webhook_secret: "hook-secret".to_string(),
            subscription_webhook_secret: None,
            api_base_url: "http://127.0.0.1:1".parse().unwrap(),
            flex_price_paise: 30_000,
            currency: "INR".to_string(),
            credits_per_purchase: 100,
        }));
        create_test_state_with_config(config)
    }

    #[tokio::test]
    async fn unconfigured_webhook_is_unavailable() {
        let server = create_test_server(create_test_state());
        server
            .post("/webhooks/billing")
            .bytes("{}".into())
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn missing_or_wrong_signature_is_forbidden() {
        let server = create_test_server(razorpay_state());
        server
            .post("/webhooks/billing")
            .bytes("{}".into())
            .await
            .assert_status(StatusCode::FORBIDDEN);

        server
            .post("/webhooks/billing")
            .add_header("x-razorpay-signature", "deadbeef")
            .bytes("{}".into())
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn signed_garbage_is_bad_request() {
        let server = create_test_server(razorpay_state());
        let body = "not json";
        server
            .post("/webhooks/billing")
            .add_header("x-razorpay-signature", sign_hex("hook-secret", body.as_bytes()))
            .bytes(body.into())
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}
