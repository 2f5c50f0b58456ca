//! API models for per-QR-code webhook configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::webhook_outbox::{OutboxCounts, OutboxDBResponse};
use crate::types::{OutboxId, QrCodeId};

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct OutboxCountsResponse {
    pub pending: i64,
    pub processing: i64,
    pub delivered: i64,
    pub failed: i64,
    pub total: i64,
}

impl From<OutboxCounts> for OutboxCountsResponse {
    fn from(c: OutboxCounts) -> Self {
        Self {
            pending: c.pending,
            processing: c.processing,
            delivered: c.delivered,
            failed: c.failed,
            total: c.total,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookStatusResponse {
    #[schema(value_type = String, format = "uuid")]
    pub qr_code_id: QrCodeId,
    pub webhook_url: Option<String>,
    pub configured: bool,
    pub deliveries: OutboxCountsResponse,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfigure {
    pub webhook_url: String,
}

/// The signing secret is only ever shown here
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfiguredResponse {
    #[schema(value_type = String, format = "uuid")]
    pub qr_code_id: QrCodeId,
    pub webhook_url: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDeliveryLog {
    #[schema(value_type = String, format = "uuid")]
    pub id: OutboxId,
    pub event_type: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<OutboxDBResponse> for WebhookDeliveryLog {
    fn from(db: OutboxDBResponse) -> Self {
        Self {
            id: db.id,
            event_type: db.event_type,
            status: db.status,
            attempts: db.attempts,
            max_attempts: db.max_attempts,
            next_retry_at: db.next_retry_at,
            last_attempt_at: db.last_attempt_at,
            response_status: db.response_status,
            last_error: db.last_error,
            created_at: db.created_at,
        }
    }
}
