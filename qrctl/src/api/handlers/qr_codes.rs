//! Dashboard QR code CRUD and analytics.
//!
//! The creation, update and delete paths are shared with the public
//! `/api/v1` surface so both apply the same plan rules.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Duration, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use sqlx::PgConnection;
use tracing::info;

use crate::{
    AppState,
    api::models::{
        pagination::PaginatedResponse,
        qr_codes::{AnalyticsQuery, AnalyticsResponse, DailyCount, ListQrCodesQuery, QrCodeCreate, QrCodeResponse, QrCodeUpdate},
        users::CurrentUser,
    },
    credits::credit_cost,
    db::{
        handlers::{Organizations, QrCodes, Repository, Users},
        models::{
            notifications::NotificationCreateDBRequest,
            qr_codes::{QrCodeCreateDBRequest, QrCodeDBResponse, QrCodeFilter, QrCodeOwner, QrCodeUpdateDBRequest, credit_input},
        },
    },
    entitlements::{Feature, PlanName, assert_can_create_qr, assert_feature},
    errors::{Error, Result},
    notifications::{CREDITS_LOW_THRESHOLD, NotificationType, credit_low_crossed, notify},
    types::{OrganizationId, Operation, Permission, QrCodeId, Resource, UserId, abbrev_uuid},
    webhooks::{QrWebhookEvent, enqueue_best_effort},
};

static HEX_COLOR: Lazy<Regex> = Lazy::new(|| Regex::new("^#[0-9A-Fa-f]{6}$").expect("static regex is valid"));

pub const DEFAULT_FOREGROUND: &str = "#000000";
pub const DEFAULT_BACKGROUND: &str = "#FFFFFF";
pub const DEFAULT_SHAPE: &str = "square";

fn validate_color(field: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(v) if !HEX_COLOR.is_match(v) => Err(Error::BadRequest {
            message: format!("{field} must be a #RRGGBB color"),
        }),
        _ => Ok(()),
    }
}

fn validate_url(url: Option<&str>) -> Result<()> {
    match url {
        Some(u) if u.trim().is_empty() => Err(Error::BadRequest {
            message: "URL is required".to_string(),
        }),
        _ => Ok(()),
    }
}

/// Dynamic codes and watermark removal are plan features
fn check_features(plan: PlanName, is_dynamic: Option<bool>, has_watermark: Option<bool>) -> Result<()> {
    if is_dynamic == Some(true) {
        assert_feature(plan, Feature::DynamicQr)?;
    }
    if has_watermark == Some(false) {
        assert_feature(plan, Feature::RemoveWatermark)?;
    }
    Ok(())
}

fn forbidden(id: QrCodeId) -> Error {
    Error::InsufficientPermissions {
        required: Permission::Owner(Resource::QrCodes),
        action: Operation::Read,
        resource: format!("QR code {id}"),
    }
}

fn not_found(id: QrCodeId) -> Error {
    Error::NotFound {
        resource: "QR code".to_string(),
        id: id.to_string(),
    }
}

/// The owner, or a member of the organization the code belongs to
pub(crate) async fn user_can_access(conn: &mut PgConnection, user_id: UserId, qr: &QrCodeDBResponse) -> Result<bool> {
    if qr.user_id == user_id {
        return Ok(true);
    }
    match qr.organization_id {
        Some(org_id) => Ok(Organizations::new(conn).get_member_role(org_id, user_id).await?.is_some()),
        None => Ok(false),
    }
}

async fn load_accessible(conn: &mut PgConnection, user_id: UserId, id: QrCodeId) -> Result<QrCodeDBResponse> {
    let qr = QrCodes::new(conn).get_by_id(id).await?.ok_or_else(|| not_found(id))?;
    if !user_can_access(conn, user_id, &qr).await? {
        return Err(forbidden(id));
    }
    Ok(qr)
}

/// Create a QR code owned by `owner`, enforcing quota, features and credits atomically
pub(crate) async fn create_for_owner(
    state: &AppState,
    owner_id: UserId,
    organization_id: Option<OrganizationId>,
    request: QrCodeCreate,
) -> Result<QrCodeDBResponse> {
    if request.url.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "URL is required".to_string(),
        });
    }
    validate_color("foregroundColor", request.foreground_color.as_deref())?;
    validate_color("backgroundColor", request.background_color.as_deref())?;

    let mut tx = state.db.begin().await?;
    let owner = Users::new(&mut tx).get_by_id(owner_id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: owner_id.to_string(),
    })?;
    let plan = owner.plan_name();
    check_features(plan, request.is_dynamic, request.has_watermark)?;

    let usage = QrCodes::new(&mut tx).usage_snapshot(owner_id, Utc::now()).await?;
    assert_can_create_qr(plan, &usage)?;

    let is_dynamic = request.is_dynamic.unwrap_or(false);
    let cost = credit_cost(&credit_input(
        is_dynamic,
        request.template.clone(),
        Some(request.url.clone()),
        request.style.as_ref(),
    ));

    let remaining = if plan.meters_credits() {
        match Users::new(&mut tx).consume_credits(owner_id, cost).await? {
            Some(balance) => Some(balance),
            None => {
                return Err(Error::InsufficientCredits {
                    required: cost,
                    available: owner.credits,
                });
            }
        }
    } else {
        None
    };

    let qr = QrCodes::new(&mut tx)
        .create(&QrCodeCreateDBRequest {
            user_id: owner_id,
            organization_id,
            url: request.url.trim().to_string(),
            title: request.title,
            description: request.description,
            template: request.template,
            foreground_color: request.foreground_color.unwrap_or_else(|| DEFAULT_FOREGROUND.to_string()),
            background_color: request.background_color.unwrap_or_else(|| DEFAULT_BACKGROUND.to_string()),
            dot_type: request.dot_type.unwrap_or_else(|| DEFAULT_SHAPE.to_string()),
            corner_type: request.corner_type.unwrap_or_else(|| DEFAULT_SHAPE.to_string()),
            logo_url: request.logo_url,
            has_watermark: request.has_watermark.unwrap_or(true),
            is_dynamic,
            style: request.style,
            redirect_url: request.redirect_url,
            expires_at: request.expires_at,
            max_scans: request.max_scans,
            credit_cost: cost,
        })
        .await?;

    if let Some(balance) = remaining
        && credit_low_crossed(balance + cost, balance)
    {
        let request = NotificationCreateDBRequest::new(
            owner_id,
            NotificationType::CreditLow,
            "Low credits",
            format!("Your account has {balance} credits remaining. Top up to keep creating QR codes."),
        )
        .with_link("/dashboard/settings/billing")
        .with_metadata(json!({ "credits": balance, "threshold": CREDITS_LOW_THRESHOLD }));
        notify(&mut tx, request).await;
    }
    tx.commit().await?;

    counter!("qrctl_qr_codes_created_total", "plan" => plan.as_str()).increment(1);
    info!(qr_code_id = %abbrev_uuid(&qr.id), user_id = %abbrev_uuid(&owner_id), cost, "QR code created");
    Ok(qr)
}

/// Plan of the user who owns a QR code. Feature gates on a code follow its owner,
/// not whoever is editing it.
pub(crate) async fn owner_plan(conn: &mut PgConnection, owner_id: UserId) -> Result<PlanName> {
    Ok(Users::new(conn)
        .get_by_id(owner_id)
        .await?
        .map(|u| u.plan_name())
        .unwrap_or(PlanName::Free))
}

/// Apply a partial update and queue `qr.updated`
pub(crate) async fn update_existing(state: &AppState, qr: &QrCodeDBResponse, request: QrCodeUpdate) -> Result<QrCodeDBResponse> {
    validate_url(request.url.as_deref())?;
    validate_color("foregroundColor", request.foreground_color.as_deref())?;
    validate_color("backgroundColor", request.background_color.as_deref())?;
    let (is_dynamic, has_watermark) = (request.is_dynamic, request.has_watermark);

    let update = QrCodeUpdateDBRequest {
        url: request.url.map(|u| u.trim().to_string()),
        title: request.title,
        description: request.description,
        foreground_color: request.foreground_color,
        background_color: request.background_color,
        dot_type: request.dot_type,
        corner_type: request.corner_type,
        logo_url: request.logo_url,
        has_watermark: request.has_watermark,
        is_dynamic: request.is_dynamic,
        expires_at: request.expires_at,
        max_scans: request.max_scans,
        redirect_url: request.redirect_url,
        is_active: request.is_active,
    };

    let mut tx = state.db.begin().await?;
    let plan = owner_plan(&mut tx, qr.user_id).await?;
    check_features(plan, is_dynamic, has_watermark)?;

    let updated = QrCodes::new(&mut tx).update(qr.id, &update).await?;
    let data = json!({
        "url": updated.url,
        "title": updated.title,
        "isActive": updated.is_active,
        "updatedAt": updated.updated_at,
    });
    enqueue_best_effort(&mut tx, &updated, QrWebhookEvent::QrUpdated, data, state.config.webhooks.max_attempts).await;
    tx.commit().await?;
    Ok(updated)
}

/// Queue `qr.deleted` and delete the code in one transaction
pub(crate) async fn delete_existing(state: &AppState, qr: &QrCodeDBResponse) -> Result<()> {
    let mut tx = state.db.begin().await?;
    let data = json!({ "url": qr.url, "title": qr.title, "deletedAt": Utc::now() });
    enqueue_best_effort(&mut tx, qr, QrWebhookEvent::QrDeleted, data, state.config.webhooks.max_attempts).await;
    QrCodes::new(&mut tx).delete(qr.id).await?;
    tx.commit().await?;
    info!(qr_code_id = %abbrev_uuid(&qr.id), "QR code deleted");
    Ok(())
}

/// List the caller's QR codes
#[utoipa::path(
    get,
    path = "/qr-codes",
    tag = "qr_codes",
    params(ListQrCodesQuery),
    responses(
        (status = 200, description = "Page of QR codes", body = PaginatedResponse<QrCodeResponse>),
        (status = 401, description = "Unauthorized"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_qr_codes(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListQrCodesQuery>,
) -> Result<Json<PaginatedResponse<QrCodeResponse>>> {
    let (offset, limit) = query.pagination.params();
    let filter = QrCodeFilter {
        owner: QrCodeOwner::User(current_user.id),
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

/// Create a QR code
#[utoipa::path(
    post,
    path = "/qr-codes",
    tag = "qr_codes",
    request_body = QrCodeCreate,
    responses(
        (status = 201, description = "QR code created", body = QrCodeResponse),
        (status = 400, description = "Invalid URL or colors"),
        (status = 402, description = "Not enough credits"),
        (status = 403, description = "Plan limit or feature not available"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn create_qr_code(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<QrCodeCreate>,
) -> Result<(StatusCode, Json<QrCodeResponse>)> {
    if let Some(org_id) = request.organization_id {
        let mut conn = state.db.acquire().await?;
        if Organizations::new(&mut conn).get_member_role(org_id, current_user.id).await?.is_none() {
            return Err(Error::InsufficientPermissions {
                required: Permission::Owner(Resource::Organizations),
                action: Operation::Create,
                resource: format!("QR codes in organization {org_id}"),
            });
        }
    }

    let organization_id = request.organization_id;
    let qr = create_for_owner(&state, current_user.id, organization_id, request).await?;
    Ok((StatusCode::CREATED, Json(QrCodeResponse::from(qr))))
}

#[utoipa::path(
    get,
    path = "/qr-codes/{id}",
    tag = "qr_codes",
    params(("id" = String, Path, description = "QR code ID")),
    responses(
        (status = 200, body = QrCodeResponse),
        (status = 403, description = "Not the owner or an organization member"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&id)))]
pub async fn get_qr_code(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<QrCodeId>) -> Result<Json<QrCodeResponse>> {
    let mut conn = state.db.acquire().await?;
    let qr = load_accessible(&mut conn, current_user.id, id).await?;
    Ok(Json(QrCodeResponse::from(qr)))
}

#[utoipa::path(
    patch,
    path = "/qr-codes/{id}",
    tag = "qr_codes",
    request_body = QrCodeUpdate,
    params(("id" = String, Path, description = "QR code ID")),
    responses(
        (status = 200, body = QrCodeResponse),
        (status = 400, description = "Invalid URL or colors"),
        (status = 403, description = "No access, or feature not on plan"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&id)))]
pub async fn update_qr_code(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<QrCodeId>,
    Json(request): Json<QrCodeUpdate>,
) -> Result<Json<QrCodeResponse>> {
    let mut conn = state.db.acquire().await?;
    let qr = load_accessible(&mut conn, current_user.id, id).await?;
    drop(conn);

    let updated = update_existing(&state, &qr, request).await?;
    Ok(Json(QrCodeResponse::from(updated)))
}

#[utoipa::path(
    delete,
    path = "/qr-codes/{id}",
    tag = "qr_codes",
    params(("id" = String, Path, description = "QR code ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the owner or an organization member"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&id)))]
pub async fn delete_qr_code(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<QrCodeId>) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await?;
    let qr = load_accessible(&mut conn, current_user.id, id).await?;
    drop(conn);

    delete_existing(&state, &qr).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Scan totals plus per-day, per-device and top-10 country breakdowns
#[utoipa::path(
    get,
    path = "/qr-codes/{id}/analytics",
    tag = "qr_codes",
    params(("id" = String, Path, description = "QR code ID"), AnalyticsQuery),
    responses(
        (status = 200, body = AnalyticsResponse),
        (status = 403, description = "Not the owner or an organization member"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&id)))]
pub async fn get_analytics(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<QrCodeId>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsResponse>> {
    let days = query.days();
    let since = Utc::now() - Duration::days(days);

    let mut conn = state.db.acquire().await?;
    let qr = load_accessible(&mut conn, current_user.id, id).await?;
    let mut repo = QrCodes::new(&mut conn);

    let total_scans = repo.count_scans_since(qr.id, None).await?;
    let scans_in_period = repo.count_scans_since(qr.id, Some(since)).await?;
    let daily = repo
        .daily_scans(qr.id, since)
        .await?
        .into_iter()
        .map(|d| DailyCount { date: d.day, count: d.count })
        .collect();
    let devices = repo.device_breakdown(qr.id, since).await?.into_iter().map(Into::into).collect();
    let countries = repo.top_countries(qr.id, since, 10).await?.into_iter().map(Into::into).collect();

    Ok(Json(AnalyticsResponse {
        qr_code_id: qr.id,
        days,
        total_scans,
        scans_in_period,
        daily,
        devices,
        countries,
    }))
}
