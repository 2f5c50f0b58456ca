//! API request/response models for developer API keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::api_keys::{ApiKeyDBResponse, ApiUsageStats};
use crate::types::{ApiKeyId, OrganizationId, UserId};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyCreate {
    pub name: String,
    pub scopes: Vec<String>,
    /// Create the key for an organization instead of the caller
    #[schema(value_type = Option<String>, format = "uuid")]
    pub organization_id: Option<OrganizationId>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRotate {
    /// Leave the old key active alongside the new one
    #[serde(default)]
    pub keep_old: bool,
}

/// Key metadata. The secret is never part of this.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ApiKeyId,
    pub name: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub organization_id: Option<OrganizationId>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub rotated_from_id: Option<ApiKeyId>,
    pub created_at: DateTime<Utc>,
}

impl From<ApiKeyDBResponse> for ApiKeyResponse {
    fn from(db: ApiKeyDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            key_prefix: db.key_prefix,
            scopes: db.scopes,
            user_id: db.user_id,
            organization_id: db.organization_id,
            is_active: db.is_active,
            expires_at: db.expires_at,
            last_used_at: db.last_used_at,
            rotated_from_id: db.rotated_from_id,
            created_at: db.created_at,
        }
    }
}

/// Returned once, at creation or rotation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiKeyCreatedResponse {
    /// The plain key; store it now, it cannot be shown again
    pub key: String,
    #[serde(flatten)]
    pub info: ApiKeyResponse,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuery {
    /// Only `GET /api/v1/usage`: must name the calling key when given
    #[param(value_type = Option<String>, format = "uuid")]
    pub api_key_id: Option<ApiKeyId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiUsageResponse {
    #[schema(value_type = String, format = "uuid")]
    pub api_key_id: ApiKeyId,
    pub request_count: i64,
    pub error_count: i64,
    pub avg_response_time_ms: f64,
    pub total_request_size: i64,
    pub total_response_size: i64,
}

impl ApiUsageResponse {
    pub fn new(api_key_id: ApiKeyId, stats: ApiUsageStats) -> Self {
        Self {
            api_key_id,
            request_count: stats.request_count,
            error_count: stats.error_count,
            avg_response_time_ms: stats.avg_response_time_ms.unwrap_or(0.0),
            total_request_size: stats.total_request_size.unwrap_or(0),
            total_response_size: stats.total_response_size.unwrap_or(0),
        }
    }
}
