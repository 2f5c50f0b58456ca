//! Public developer API under `/api/v1`, authenticated by API key.
//!
//! A key belongs either to a user or to an organization. User keys see the QR codes
//! their user can see on the dashboard; organization keys see every QR code created
//! by a member of the organization. Codes outside that set look missing.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;
use url::Url;

use crate::{
    AppState,
    api::{
        handlers::qr_codes::{create_for_owner, delete_existing, owner_plan, update_existing, user_can_access},
        models::{
            api_keys::{ApiUsageResponse, UsageQuery},
            billing::PlanCatalogueEntry,
            pagination::{PaginatedResponse, Pagination},
            qr_codes::{ListQrCodesQuery, QrCodeCreate, QrCodeResponse, QrCodeUpdate, ScanResponse},
            webhooks::{WebhookConfigure, WebhookConfiguredResponse, WebhookDeliveryLog, WebhookStatusResponse},
        },
    },
    auth::api_key::ApiKeyAuth,
    db::{
        handlers::{ApiUsage, Organizations, QrCodes, Repository, WebhookOutbox},
        models::qr_codes::{QrCodeDBResponse, QrCodeFilter, QrCodeOwner},
    },
    entitlements::{Feature, assert_feature},
    errors::{Error, Result},
    types::{OrganizationId, QrCodeId, UserId, abbrev_uuid},
    webhooks::generate_secret,
};

/// Recent deliveries shown by the logs endpoint
const DELIVERY_LOG_LIMIT: i64 = 50;

/// Who a key acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyPrincipal {
    User(UserId),
    Organization(OrganizationId),
}

fn principal(auth: &ApiKeyAuth) -> Result<KeyPrincipal> {
    match (auth.user_id, auth.organization_id) {
        (Some(user_id), _) => Ok(KeyPrincipal::User(user_id)),
        (None, Some(org_id)) => Ok(KeyPrincipal::Organization(org_id)),
        (None, None) => Err(Error::Unauthenticated {
            message: Some("Invalid or expired API key".to_string()),
        }),
    }
}

fn not_found(id: QrCodeId) -> Error {
    Error::NotFound {
        resource: "QR code".to_string(),
        id: id.to_string(),
    }
}

/// Load a QR code visible to the key
async fn load_for_key(state: &AppState, auth: &ApiKeyAuth, id: QrCodeId) -> Result<QrCodeDBResponse> {
    let mut conn = state.db.acquire().await?;
    let qr = QrCodes::new(&mut conn).get_by_id(id).await?.ok_or_else(|| not_found(id))?;

    let visible = match principal(auth)? {
        KeyPrincipal::User(user_id) => user_can_access(&mut conn, user_id, &qr).await?,
        KeyPrincipal::Organization(org_id) => {
            qr.organization_id == Some(org_id) || Organizations::new(&mut conn).get_member_role(org_id, qr.user_id).await?.is_some()
        }
    };
    if visible { Ok(qr) } else { Err(not_found(id)) }
}

fn validate_webhook_url(raw: &str) -> Result<String> {
    let invalid = || Error::BadRequest {
        message: "webhookUrl must be an http(s) URL".to_string(),
    };
    let url = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(url.to_string())
}

#[utoipa::path(
    get,
    path = "/qr-codes",
    tag = "v1",
    params(ListQrCodesQuery),
    responses((status = 200, body = PaginatedResponse<QrCodeResponse>), (status = 403, description = "Missing qr:read scope")),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(api_key_id = %abbrev_uuid(&auth.key_id)))]
pub async fn list_qr_codes(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Query(query): Query<ListQrCodesQuery>,
) -> Result<Json<PaginatedResponse<QrCodeResponse>>> {
    auth.require_scope("qr:read")?;
    let owner = match principal(&auth)? {
        KeyPrincipal::User(user_id) => QrCodeOwner::User(user_id),
        KeyPrincipal::Organization(org_id) => QrCodeOwner::OrganizationMembers(org_id),
    };
    let (offset, limit) = query.pagination.params();
    let filter = QrCodeFilter {
        owner,
        search: query.search.filter(|s| !s.trim().is_empty()),
        limit,
        offset,
    };

    let mut conn = state.db.acquire().await?;
    let mut repo = QrCodes::new(&mut conn);
    let codes = repo.list(&filter).await?;
    let total = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        codes.into_iter().map(QrCodeResponse::from).collect(),
        total,
        offset,
        limit,
    )))
}

#[utoipa::path(
    post,
    path = "/qr-codes",
    tag = "v1",
    request_body = QrCodeCreate,
    responses(
        (status = 201, body = QrCodeResponse),
        (status = 400, description = "Invalid URL or colors"),
        (status = 402, description = "Not enough credits"),
        (status = 403, description = "Missing scope, plan limit or feature not available"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(api_key_id = %abbrev_uuid(&auth.key_id)))]
pub async fn create_qr_code(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Json(request): Json<QrCodeCreate>,
) -> Result<(StatusCode, Json<QrCodeResponse>)> {
    auth.require_scope("qr:write")?;

    let (owner_id, organization_id) = match principal(&auth)? {
        KeyPrincipal::User(user_id) => (user_id, None),
        KeyPrincipal::Organization(org_id) => {
            let mut conn = state.db.acquire().await?;
            let org = Organizations::new(&mut conn).get_by_id(org_id).await?.ok_or_else(|| Error::NotFound {
                resource: "Organization".to_string(),
                id: org_id.to_string(),
            })?;
            (org.owner_id, Some(org_id))
        }
    };

    let qr = create_for_owner(&state, owner_id, organization_id, request).await?;
    Ok((StatusCode::CREATED, Json(QrCodeResponse::from(qr))))
}

#[utoipa::path(
    get,
    path = "/qr-codes/{id}",
    tag = "v1",
    params(("id" = String, Path, description = "QR code ID")),
    responses((status = 200, body = QrCodeResponse), (status = 404, description = "Not found")),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&id)))]
pub async fn get_qr_code(State(state): State<AppState>, auth: ApiKeyAuth, Path(id): Path<QrCodeId>) -> Result<Json<QrCodeResponse>> {
    auth.require_scope("qr:read")?;
    let qr = load_for_key(&state, &auth, id).await?;
    Ok(Json(QrCodeResponse::from(qr)))
}

#[utoipa::path(
    patch,
    path = "/qr-codes/{id}",
    tag = "v1",
    request_body = QrCodeUpdate,
    params(("id" = String, Path, description = "QR code ID")),
    responses((status = 200, body = QrCodeResponse), (status = 404, description = "Not found")),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&id)))]
pub async fn update_qr_code(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(id): Path<QrCodeId>,
    Json(request): Json<QrCodeUpdate>,
) -> Result<Json<QrCodeResponse>> {
    auth.require_scope("qr:write")?;
    let qr = load_for_key(&state, &auth, id).await?;
    let updated = update_existing(&state, &qr, request).await?;
    Ok(Json(QrCodeResponse::from(updated)))
}

#[utoipa::path(
    delete,
    path = "/qr-codes/{id}",
    tag = "v1",
    params(("id" = String, Path, description = "QR code ID")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not found")),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&id)))]
pub async fn delete_qr_code(State(state): State<AppState>, auth: ApiKeyAuth, Path(id): Path<QrCodeId>) -> Result<StatusCode> {
    auth.require_scope("qr:delete")?;
    let qr = load_for_key(&state, &auth, id).await?;
    delete_existing(&state, &qr).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/qr-codes/{id}/scans",
    tag = "v1",
    params(("id" = String, Path, description = "QR code ID"), Pagination),
    responses((status = 200, body = [ScanResponse]), (status = 404, description = "Not found")),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&id)))]
pub async fn list_scans(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(id): Path<QrCodeId>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<ScanResponse>>> {
    auth.require_scope("scan:read")?;
    let qr = load_for_key(&state, &auth, id).await?;
    let (offset, limit) = pagination.params();

    let mut conn = state.db.acquire().await?;
    let scans = QrCodes::new(&mut conn).list_scans(qr.id, limit, offset).await?;
    Ok(Json(scans.into_iter().map(ScanResponse::from).collect()))
}

/// Usage of the calling key
#[utoipa::path(
    get,
    path = "/usage",
    tag = "v1",
    params(UsageQuery),
    responses((status = 200, body = ApiUsageResponse), (status = 403, description = "apiKeyId names another key")),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(api_key_id = %abbrev_uuid(&auth.key_id)))]
pub async fn get_usage(State(state): State<AppState>, auth: ApiKeyAuth, Query(query): Query<UsageQuery>) -> Result<Json<ApiUsageResponse>> {
    if query.api_key_id.is_some_and(|id| id != auth.key_id) {
        return Err(Error::Forbidden {
            message: "You can only view usage for the key making the request".to_string(),
        });
    }
    let mut conn = state.db.acquire().await?;
    let stats = ApiUsage::new(&mut conn).stats(auth.key_id, query.from, query.to).await?;
    Ok(Json(ApiUsageResponse::new(auth.key_id, stats)))
}

#[utoipa::path(
    get,
    path = "/webhooks/{qr_code_id}",
    tag = "v1",
    params(("qr_code_id" = String, Path, description = "QR code ID")),
    responses((status = 200, body = WebhookStatusResponse), (status = 404, description = "Not found")),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&qr_code_id)))]
pub async fn get_webhook(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(qr_code_id): Path<QrCodeId>,
) -> Result<Json<WebhookStatusResponse>> {
    auth.require_scope("webhook:read")?;
    let qr = load_for_key(&state, &auth, qr_code_id).await?;

    let mut conn = state.db.acquire().await?;
    let counts = WebhookOutbox::new(&mut conn).counts_for_qr(qr.id).await?;
    Ok(Json(WebhookStatusResponse {
        qr_code_id: qr.id,
        configured: qr.webhook_url.is_some(),
        webhook_url: qr.webhook_url,
        deliveries: counts.into(),
    }))
}

/// Set the webhook URL and issue a fresh signing secret
#[utoipa::path(
    put,
    path = "/webhooks/{qr_code_id}",
    tag = "v1",
    request_body = WebhookConfigure,
    params(("qr_code_id" = String, Path, description = "QR code ID")),
    responses(
        (status = 200, body = WebhookConfiguredResponse),
        (status = 400, description = "Not an http(s) URL"),
        (status = 403, description = "Plan does not include webhooks"),
        (status = 404, description = "Not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&qr_code_id)))]
pub async fn configure_webhook(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(qr_code_id): Path<QrCodeId>,
    Json(request): Json<WebhookConfigure>,
) -> Result<Json<WebhookConfiguredResponse>> {
    auth.require_scope("webhook:write")?;
    let webhook_url = validate_webhook_url(&request.webhook_url)?;
    let qr = load_for_key(&state, &auth, qr_code_id).await?;
    let mut conn = state.db.acquire().await?;
    assert_feature(owner_plan(&mut conn, qr.user_id).await?, Feature::Webhooks)?;

    let secret = generate_secret();
    QrCodes::new(&mut conn)
        .set_webhook(qr.id, Some(&webhook_url), Some(&secret))
        .await?
        .ok_or_else(|| not_found(qr.id))?;
    info!("Webhook configured");

    Ok(Json(WebhookConfiguredResponse {
        qr_code_id: qr.id,
        webhook_url,
        webhook_secret: secret,
    }))
}

#[utoipa::path(
    delete,
    path = "/webhooks/{qr_code_id}",
    tag = "v1",
    params(("qr_code_id" = String, Path, description = "QR code ID")),
    responses((status = 204, description = "Removed"), (status = 404, description = "Not found")),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&qr_code_id)))]
pub async fn delete_webhook(State(state): State<AppState>, auth: ApiKeyAuth, Path(qr_code_id): Path<QrCodeId>) -> Result<StatusCode> {
    auth.require_scope("webhook:delete")?;
    let qr = load_for_key(&state, &auth, qr_code_id).await?;

    let mut conn = state.db.acquire().await?;
    QrCodes::new(&mut conn).set_webhook(qr.id, None, None).await?;
    info!("Webhook removed");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/webhooks/{qr_code_id}/logs",
    tag = "v1",
    params(("qr_code_id" = String, Path, description = "QR code ID")),
    responses((status = 200, body = [WebhookDeliveryLog]), (status = 404, description = "Not found")),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&qr_code_id)))]
pub async fn webhook_logs(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(qr_code_id): Path<QrCodeId>,
) -> Result<Json<Vec<WebhookDeliveryLog>>> {
    auth.require_scope("webhook:read")?;
    let qr = load_for_key(&state, &auth, qr_code_id).await?;

    let mut conn = state.db.acquire().await?;
    let rows = WebhookOutbox::new(&mut conn).list_for_qr(qr.id, DELIVERY_LOG_LIMIT).await?;
    Ok(Json(rows.into_iter().map(WebhookDeliveryLog::from).collect()))
}

/// Plans with their limits, features and included credits. Public.
#[utoipa::path(
    get,
    path = "/plans",
    tag = "v1",
    responses((status = 200, body = [PlanCatalogueEntry]))
)]
pub async fn list_plans() -> Json<Vec<PlanCatalogueEntry>> {
    Json(PlanCatalogueEntry::all())
}
