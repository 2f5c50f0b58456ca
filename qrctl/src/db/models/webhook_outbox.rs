//! Database models for the outgoing webhook outbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::types::{OutboxId, QrCodeId};

/// Lifecycle of an outbox row: pending → processing → delivered | pending (retry) | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown outbox status: {s}")),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OutboxDBResponse {
    pub id: OutboxId,
    pub qr_code_id: QrCodeId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub webhook_url: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A claimed delivery with the signing secret captured at enqueue time
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedDelivery {
    pub id: OutboxId,
    pub qr_code_id: QrCodeId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub webhook_url: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OutboxCreateDBRequest {
    pub qr_code_id: QrCodeId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub webhook_url: String,
    pub webhook_secret: Option<String>,
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct OutboxCounts {
    pub pending: i64,
    pub processing: i64,
    pub delivered: i64,
    pub failed: i64,
    pub total: i64,
}
