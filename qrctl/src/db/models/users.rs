//! Database models for users.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::entitlements::PlanName;
use crate::types::UserId;

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    /// `native` or `proxy-header`
    pub auth_source: String,
}

/// Database request for updating a user
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub display_name: Option<String>,
    pub plan: Option<PlanName>,
}

/// Filter for listing users
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub skip: i64,
    pub limit: i64,
    /// Case-insensitive match on email or display name
    pub search: Option<String>,
}

/// Database response for a user
#[derive(Debug, Clone, FromRow)]
pub struct UserDBResponse {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub auth_source: String,
    pub is_admin: bool,
    pub is_locked: bool,
    pub lock_reason: Option<String>,
    pub plan: String,
    pub credits: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserDBResponse {
    /// The stored plan, falling back to FREE for anything unrecognised
    pub fn plan_name(&self) -> PlanName {
        PlanName::resolve(Some(&self.plan))
    }
}

/// Aggregate counts for the admin dashboard
#[derive(Debug, Clone, FromRow)]
pub struct UserCounts {
    pub total: i64,
    pub active: i64,
    pub locked: i64,
}
