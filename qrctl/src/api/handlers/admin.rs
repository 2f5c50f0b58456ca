//! Platform administration: stats, user management, manual billing adjustments.
//!
//! Every handler takes [`AdminUser`], so non-admins get 403 before any query runs.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        admin::{AdjustmentType, AdminStats, AdminUserStats, BillingAdjustRequest, BillingAdjustmentResponse},
        pagination::PaginatedResponse,
        users::{ListUsersQuery, LockUserRequest, UserResponse},
    },
    auth::current_user::AdminUser,
    db::{
        handlers::{Billing, Organizations, Repository, Users, WebhookOutbox},
        models::{billing::BillingAdjustmentCreateDBRequest, users::UserFilter, webhook_outbox::OutboxStatus},
    },
    entitlements::PlanName,
    errors::{Error, Result},
    types::{UserId, abbrev_uuid},
};

fn user_not_found(id: UserId) -> Error {
    Error::NotFound {
        resource: "User".to_string(),
        id: id.to_string(),
    }
}

/// Whole credits granted for an amount in cents, rounded half away from zero
fn credits_for_cents(amount_cents: i64) -> i32 {
    let credits = (amount_cents as f64 / 100.0).round();
    credits.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

#[utoipa::path(
    get,
    path = "/admin/stats",
    tag = "admin",
    responses((status = 200, body = AdminStats), (status = 403, description = "Not an admin"))
)]
#[tracing::instrument(skip_all)]
pub async fn get_stats(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<AdminStats>> {
    let mut conn = state.db.acquire().await?;
    let users = Users::new(&mut conn).counts().await?;
    let organizations = Organizations::new(&mut conn).count().await?;
    let revenue_cents = Billing::new(&mut conn).paid_revenue_cents().await?;
    let pending = WebhookOutbox::new(&mut conn).count_with_status(OutboxStatus::Pending).await?;

    Ok(Json(AdminStats {
        users: AdminUserStats {
            total: users.total,
            active: users.active,
            locked: users.locked,
        },
        organizations,
        revenue: revenue_cents as f64 / 100.0,
        pending_webhook_deliveries: pending,
    }))
}

#[utoipa::path(
    get,
    path = "/admin/users",
    tag = "admin",
    params(ListUsersQuery),
    responses((status = 200, body = PaginatedResponse<UserResponse>), (status = 403, description = "Not an admin"))
)]
#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<PaginatedResponse<UserResponse>>> {
    let (skip, limit) = query.params();
    let filter = UserFilter {
        skip,
        limit,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };

    let mut conn = state.db.acquire().await?;
    let mut users = Users::new(&mut conn);
    let rows = users.list(&filter).await?;
    let total = users.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        rows.into_iter().map(UserResponse::from).collect(),
        total,
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/admin/users/{id}",
    tag = "admin",
    params(("id" = String, Path, description = "User ID")),
    responses((status = 200, body = UserResponse), (status = 404, description = "Not found"))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&id)))]
pub async fn get_user(State(state): State<AppState>, _admin: AdminUser, Path(id): Path<UserId>) -> Result<Json<UserResponse>> {
    let mut conn = state.db.acquire().await?;
    let user = Users::new(&mut conn).get_by_id(id).await?.ok_or_else(|| user_not_found(id))?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/lock",
    tag = "admin",
    request_body = LockUserRequest,
    params(("id" = String, Path, description = "User ID")),
    responses((status = 200, body = UserResponse), (status = 404, description = "Not found"))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&id)))]
pub async fn lock_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<UserId>,
    body: Option<Json<LockUserRequest>>,
) -> Result<Json<UserResponse>> {
    if id == admin.id {
        return Err(Error::BadRequest {
            message: "You cannot lock your own account".to_string(),
        });
    }
    let reason = body.and_then(|Json(b)| b.reason).filter(|r| !r.trim().is_empty());

    let mut conn = state.db.acquire().await?;
    let user = Users::new(&mut conn)
        .set_locked(id, true, reason.as_deref())
        .await?
        .ok_or_else(|| user_not_found(id))?;
    info!(admin_id = %abbrev_uuid(&admin.id), "User locked");
    Ok(Json(user.into()))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/unlock",
    tag = "admin",
    params(("id" = String, Path, description = "User ID")),
    responses((status = 200, body = UserResponse), (status = 404, description = "Not found"))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&id)))]
pub async fn unlock_user(State(state): State<AppState>, AdminUser(admin): AdminUser, Path(id): Path<UserId>) -> Result<Json<UserResponse>> {
    let mut conn = state.db.acquire().await?;
    let user = Users::new(&mut conn)
        .set_locked(id, false, None)
        .await?
        .ok_or_else(|| user_not_found(id))?;
    info!(admin_id = %abbrev_uuid(&admin.id), "User unlocked");
    Ok(Json(user.into()))
}

/// Grant credits, override a plan, or record a refund
#[utoipa::path(
    post,
    path = "/admin/billing/adjust",
    tag = "admin",
    request_body = BillingAdjustRequest,
    responses(
        (status = 200, body = BillingAdjustmentResponse),
        (status = 400, description = "Missing amount or plan"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&request.user_id), kind = request.adjustment_type.as_str()))]
pub async fn adjust_billing(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(request): Json<BillingAdjustRequest>,
) -> Result<Json<BillingAdjustmentResponse>> {
    let user_id = request.user_id;
    let mut tx = state.db.begin().await?;
    if Users::new(&mut tx).get_by_id(user_id).await?.is_none() {
        return Err(user_not_found(user_id));
    }

    let mut plan = None;
    let mut credits = None;
    match request.adjustment_type {
        AdjustmentType::CreditGrant => {
            let Some(amount_cents) = request.amount_cents else {
                return Err(Error::BadRequest {
                    message: "amount_cents is required for credit_grant".to_string(),
                });
            };
            credits = Users::new(&mut tx).add_credits(user_id, credits_for_cents(amount_cents)).await?;
        }
        AdjustmentType::PlanOverride => {
            let Some(requested) = request.plan.as_deref().map(str::trim).filter(|p| !p.is_empty()) else {
                return Err(Error::BadRequest {
                    message: "plan is required for plan_override".to_string(),
                });
            };
            let name: PlanName = requested.parse().map_err(|message| Error::BadRequest { message })?;
            Users::new(&mut tx).set_plan(user_id, name).await?;
            plan = Some(name.as_str().to_string());
        }
        AdjustmentType::Refund => {}
    }

    let adjustment = Billing::new(&mut tx)
        .create_adjustment(&BillingAdjustmentCreateDBRequest {
            user_id,
            adjustment_type: request.adjustment_type.as_str().to_string(),
            amount_cents: request.amount_cents,
            plan: plan.or(request.plan),
            reason: request.reason,
            created_by: admin.id,
        })
        .await?;
    tx.commit().await?;

    info!(admin_id = %abbrev_uuid(&admin.id), "Billing adjustment recorded");
    Ok(Json(BillingAdjustmentResponse::new(adjustment, credits)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_server, create_test_state};
    use axum::http::StatusCode;

    #[test]
    fn grants_round_to_whole_credits() {
        assert_eq!(credits_for_cents(10_000), 100);
        assert_eq!(credits_for_cents(150), 2);
        assert_eq!(credits_for_cents(149), 1);
        assert_eq!(credits_for_cents(49), 0);
        assert_eq!(credits_for_cents(-250), -3);
    }

    #[tokio::test]
    async fn admin_routes_require_a_session() {
        let server = create_test_server(create_test_state());
        server.get("/api/admin/stats").await.assert_status(StatusCode::UNAUTHORIZED);
        server.get("/api/admin/users").await.assert_status(StatusCode::UNAUTHORIZED);
    }
}
