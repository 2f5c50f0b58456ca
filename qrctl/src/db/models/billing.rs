//! Database models for subscriptions, invoices and manual billing adjustments.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::billing::SubscriptionStatus;
use crate::types::{InvoiceId, SubscriptionId, UserId};

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionDBResponse {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub gateway: String,
    pub gateway_subscription_id: String,
    pub plan: String,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub grace_until: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionDBResponse {
    /// Parsed status; rows are constrained by a CHECK so unknown values mean `incomplete`
    pub fn status(&self) -> SubscriptionStatus {
        self.status.parse().unwrap_or(SubscriptionStatus::Incomplete)
    }
}

/// A subscription first seen through a gateway webhook
#[derive(Debug, Clone)]
pub struct SubscriptionCreateDBRequest {
    pub user_id: UserId,
    pub gateway: String,
    pub gateway_subscription_id: String,
    pub plan: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub grace_until: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct InvoiceDBResponse {
    pub id: InvoiceId,
    pub user_id: UserId,
    pub gateway: String,
    pub gateway_invoice_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub pdf_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InvoiceCreateDBRequest {
    pub user_id: UserId,
    pub gateway: String,
    pub gateway_invoice_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub pdf_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BillingAdjustmentDBResponse {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    pub adjustment_type: String,
    pub amount_cents: Option<i64>,
    pub plan: Option<String>,
    pub reason: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BillingAdjustmentCreateDBRequest {
    pub user_id: UserId,
    pub adjustment_type: String,
    pub amount_cents: Option<i64>,
    pub plan: Option<String>,
    pub reason: Option<String>,
    pub created_by: UserId,
}
