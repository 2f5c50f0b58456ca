//! API request/response models for users.

use crate::db::models::users::UserDBResponse;
use crate::entitlements::{PlanEntitlements, PlanName, UsageSnapshot};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// The authenticated caller, resolved fresh from the database on every request
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub plan: PlanName,
    pub credits: i32,
}

impl From<UserDBResponse> for CurrentUser {
    fn from(db: UserDBResponse) -> Self {
        let plan = db.plan_name();
        Self {
            id: db.id,
            email: db.email,
            display_name: db.display_name,
            is_admin: db.is_admin,
            plan,
            credits: db.credits,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub auth_source: String,
    pub is_admin: bool,
    pub is_locked: bool,
    pub lock_reason: Option<String>,
    pub plan: PlanName,
    pub credits: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        let plan = db.plan_name();
        Self {
            id: db.id,
            email: db.email,
            display_name: db.display_name,
            auth_source: db.auth_source,
            is_admin: db.is_admin,
            is_locked: db.is_locked,
            lock_reason: db.lock_reason,
            plan,
            credits: db.credits,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// `GET /api/me`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MeResponse {
    pub user: CurrentUser,
    pub entitlements: PlanEntitlements,
    pub usage: UsageSnapshot,
}

/// Admin user listing, page-numbered
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListUsersQuery {
    /// 1-based page number
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// Case-insensitive substring of email or display name
    pub search: Option<String>,
}

impl ListUsersQuery {
    pub const DEFAULT_LIMIT: i64 = 20;

    /// `(skip, limit)` with page >= 1 and limit in 1..=100
    pub fn params(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 100);
        let page = self.page.unwrap_or(1).max(1);
        ((page - 1) * limit, limit)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LockUserRequest {
    pub reason: Option<String>,
}
