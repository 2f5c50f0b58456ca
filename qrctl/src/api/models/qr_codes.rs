//! API request/response models for QR codes, scans and analytics.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::db::models::qr_codes::{QrCodeDBResponse, ScanBucket, ScanDBResponse};
use crate::types::{OrganizationId, QrCodeId, ScanId, UserId};

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeCreate {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub template: Option<String>,
    pub foreground_color: Option<String>,
    pub background_color: Option<String>,
    pub dot_type: Option<String>,
    pub corner_type: Option<String>,
    pub logo_url: Option<String>,
    pub has_watermark: Option<bool>,
    pub is_dynamic: Option<bool>,
    /// Gradient, sticker and effects settings
    pub style: Option<serde_json::Value>,
    pub redirect_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_scans: Option<i32>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub organization_id: Option<OrganizationId>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeUpdate {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub foreground_color: Option<String>,
    pub background_color: Option<String>,
    pub dot_type: Option<String>,
    pub corner_type: Option<String>,
    pub logo_url: Option<String>,
    pub has_watermark: Option<bool>,
    pub is_dynamic: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_scans: Option<i32>,
    pub redirect_url: Option<String>,
    pub is_active: Option<bool>,
}

/// A QR code as returned to its owner. The webhook secret is never included.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: QrCodeId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub organization_id: Option<OrganizationId>,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub template: Option<String>,
    pub foreground_color: String,
    pub background_color: String,
    pub dot_type: String,
    pub corner_type: String,
    pub logo_url: Option<String>,
    pub has_watermark: bool,
    pub is_dynamic: bool,
    pub style: Option<serde_json::Value>,
    pub redirect_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_scans: Option<i32>,
    pub is_active: bool,
    pub scan_count: i32,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub webhook_url: Option<String>,
    pub credit_cost: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<QrCodeDBResponse> for QrCodeResponse {
    fn from(db: QrCodeDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            organization_id: db.organization_id,
            url: db.url,
            title: db.title,
            description: db.description,
            template: db.template,
            foreground_color: db.foreground_color,
            background_color: db.background_color,
            dot_type: db.dot_type,
            corner_type: db.corner_type,
            logo_url: db.logo_url,
            has_watermark: db.has_watermark,
            is_dynamic: db.is_dynamic,
            style: db.style,
            redirect_url: db.redirect_url,
            expires_at: db.expires_at,
            max_scans: db.max_scans,
            is_active: db.is_active,
            scan_count: db.scan_count,
            last_scanned_at: db.last_scanned_at,
            webhook_url: db.webhook_url,
            credit_cost: db.credit_cost,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListQrCodesQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
    /// Case-insensitive match on title, description or URL
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ScanId,
    pub scanned_at: DateTime<Utc>,
    pub device_type: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
}

impl From<ScanDBResponse> for ScanResponse {
    fn from(db: ScanDBResponse) -> Self {
        Self {
            id: db.id,
            scanned_at: db.scanned_at,
            device_type: db.device_type,
            country: db.country,
            city: db.city,
            referrer: db.referrer,
            user_agent: db.user_agent,
        }
    }
}

/// Body accepted by the public scan endpoint; everything is optional
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ScanRecord {
    pub referrer: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecordedResponse {
    pub success: bool,
    pub redirect_url: String,
    #[schema(value_type = String, format = "uuid")]
    pub scan_id: ScanId,
}

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct AnalyticsQuery {
    /// Look-back window in days (default 30, max 365)
    pub days: Option<i64>,
}

impl AnalyticsQuery {
    pub fn days(&self) -> i64 {
        self.days.unwrap_or(30).clamp(1, 365)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BucketCount {
    pub label: String,
    pub count: i64,
}

impl From<ScanBucket> for BucketCount {
    fn from(b: ScanBucket) -> Self {
        Self {
            label: b.label,
            count: b.count,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    #[schema(value_type = String, format = "uuid")]
    pub qr_code_id: QrCodeId,
    pub days: i64,
    pub total_scans: i64,
    pub scans_in_period: i64,
    pub daily: Vec<DailyCount>,
    pub devices: Vec<BucketCount>,
    pub countries: Vec<BucketCount>,
}
