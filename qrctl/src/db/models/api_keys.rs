//! Database models for developer API keys and their usage logs.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{ApiKeyId, OrganizationId, UserId};

#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyDBResponse {
    pub id: ApiKeyId,
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    pub user_id: Option<UserId>,
    pub organization_id: Option<OrganizationId>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub rotated_from_id: Option<ApiKeyId>,
    pub created_at: DateTime<Utc>,
}

impl ApiKeyDBResponse {
    /// Usable right now: active and not past its expiry
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Exactly one of `user_id` / `organization_id` is set
#[derive(Debug, Clone)]
pub struct ApiKeyCreateDBRequest {
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    pub user_id: Option<UserId>,
    pub organization_id: Option<OrganizationId>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rotated_from_id: Option<ApiKeyId>,
}

#[derive(Debug, Clone)]
pub struct ApiUsageLogCreateDBRequest {
    pub api_key_id: ApiKeyId,
    pub user_id: Option<UserId>,
    pub organization_id: Option<OrganizationId>,
    pub endpoint: String,
    pub method: String,
    pub status_code: i32,
    pub request_size: Option<i64>,
    pub response_size: Option<i64>,
    pub response_time_ms: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, FromRow)]
pub struct ApiUsageStats {
    pub request_count: i64,
    pub error_count: i64,
    pub avg_response_time_ms: Option<f64>,
    pub total_request_size: Option<i64>,
    pub total_response_size: Option<i64>,
}
