//! API models for the admin surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::billing::BillingAdjustmentDBResponse;
use crate::types::UserId;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdminUserStats {
    pub total: i64,
    pub active: i64,
    pub locked: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdminStats {
    pub users: AdminUserStats,
    pub organizations: i64,
    /// Sum of paid invoices, in currency units
    pub revenue: f64,
    pub pending_webhook_deliveries: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    CreditGrant,
    PlanOverride,
    Refund,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditGrant => "credit_grant",
            Self::PlanOverride => "plan_override",
            Self::Refund => "refund",
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BillingAdjustRequest {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub adjustment_type: AdjustmentType,
    pub amount_cents: Option<i64>,
    pub plan: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BillingAdjustmentResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: uuid::Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub adjustment_type: String,
    pub amount_cents: Option<i64>,
    pub plan: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Credit balance after a grant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<i32>,
}

impl BillingAdjustmentResponse {
    pub fn new(db: BillingAdjustmentDBResponse, credits: Option<i32>) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            adjustment_type: db.adjustment_type,
            amount_cents: db.amount_cents,
            plan: db.plan,
            reason: db.reason,
            created_at: db.created_at,
            credits,
        }
    }
}
