//! Database models for QR codes and their scans.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::FromRow;

use crate::credits::QrCreditInput;
use crate::types::{OrganizationId, QrCodeId, ScanId, UserId};

#[derive(Debug, Clone, FromRow)]
pub struct QrCodeDBResponse {
    pub id: QrCodeId,
    pub user_id: UserId,
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
    pub style: Option<Value>,
    pub redirect_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_scans: Option<i32>,
    pub is_active: bool,
    pub scan_count: i32,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub credit_cost: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QrCodeDBResponse {
    pub fn credit_input(&self) -> QrCreditInput {
        credit_input(self.is_dynamic, self.template.clone(), Some(self.url.clone()), self.style.as_ref())
    }
}

/// Builds the pricing input from stored attributes. Styling counts as present
/// when its key in `style` holds anything other than null or `false`.
pub fn credit_input(is_dynamic: bool, template: Option<String>, url: Option<String>, style: Option<&Value>) -> QrCreditInput {
    let has = |key: &str| {
        style
            .and_then(|s| s.get(key))
            .is_some_and(|v| !v.is_null() && v != &Value::Bool(false))
    };
    QrCreditInput {
        is_dynamic,
        template,
        url,
        has_gradient: has("gradient"),
        has_sticker: has("sticker"),
        has_effects: has("effects"),
    }
}

#[derive(Debug, Clone)]
pub struct QrCodeCreateDBRequest {
    pub user_id: UserId,
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
    pub style: Option<Value>,
    pub redirect_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_scans: Option<i32>,
    pub credit_cost: i32,
}

/// Partial update; `None` leaves the column unchanged
#[derive(Debug, Clone, Default)]
pub struct QrCodeUpdateDBRequest {
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

/// Whose QR codes a listing covers
#[derive(Debug, Clone, Copy)]
pub enum QrCodeOwner {
    User(UserId),
    /// Every QR code created by a member of the organization
    OrganizationMembers(OrganizationId),
}

#[derive(Debug, Clone)]
pub struct QrCodeFilter {
    pub owner: QrCodeOwner,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ScanDBResponse {
    pub id: ScanId,
    pub qr_code_id: QrCodeId,
    pub scanned_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScanCreateDBRequest {
    pub qr_code_id: QrCodeId,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DailyScanCount {
    pub day: NaiveDate,
    pub count: i64,
}

/// A scan count grouped by device type or country
#[derive(Debug, Clone, FromRow)]
pub struct ScanBucket {
    pub label: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn credit_input_reads_style_flags() {
        let style = json!({"gradient": {"from": "#000", "to": "#fff"}, "sticker": null, "effects": false});
        let input = credit_input(false, None, Some("https://a.example".to_string()), Some(&style));
        assert!(input.has_gradient);
        assert!(!input.has_sticker);
        assert!(!input.has_effects);

        let plain = credit_input(true, Some("business".to_string()), None, None);
        assert!(plain.is_dynamic);
        assert!(!plain.has_gradient && !plain.has_sticker && !plain.has_effects);
    }
}
