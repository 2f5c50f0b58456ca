//! API models for subscriptions, billing access and invoices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::billing::BillingAccess;
use crate::credits::QrCapacity;
use crate::db::models::billing::{InvoiceDBResponse, SubscriptionDBResponse};
use crate::entitlements::{PlanEntitlements, PlanName};
use crate::types::{InvoiceId, SubscriptionId};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: SubscriptionId,
    pub gateway: String,
    pub plan: String,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub grace_until: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl From<SubscriptionDBResponse> for SubscriptionResponse {
    fn from(db: SubscriptionDBResponse) -> Self {
        Self {
            id: db.id,
            gateway: db.gateway,
            plan: db.plan,
            status: db.status,
            current_period_start: db.current_period_start,
            current_period_end: db.current_period_end,
            grace_until: db.grace_until,
            canceled_at: db.canceled_at,
        }
    }
}

/// `GET /api/billing/subscription`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionOverview {
    pub plan: PlanName,
    pub subscription: Option<SubscriptionResponse>,
    pub entitlements: PlanEntitlements,
    pub access: BillingAccess,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InvoiceResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: InvoiceId,
    pub gateway: String,
    pub gateway_invoice_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub pdf_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<InvoiceDBResponse> for InvoiceResponse {
    fn from(db: InvoiceDBResponse) -> Self {
        Self {
            id: db.id,
            gateway: db.gateway,
            gateway_invoice_id: db.gateway_invoice_id,
            amount_cents: db.amount_cents,
            currency: db.currency,
            status: db.status,
            pdf_url: db.pdf_url,
            paid_at: db.paid_at,
            created_at: db.created_at,
        }
    }
}

/// Acknowledgement body for gateway webhooks
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookAck {
    pub fn ok() -> Self {
        Self { ok: true, message: None }
    }

    pub fn duplicate() -> Self {
        Self {
            ok: true,
            message: Some("Duplicate webhook, ignored".to_string()),
        }
    }
}

/// `GET /api/user/credits`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreditsResponse {
    pub credits: i32,
    pub plan: PlanName,
    pub total_used: i64,
    pub capacity: QrCapacity,
}

/// One row of `GET /api/v1/plans`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlanCatalogueEntry {
    #[serde(flatten)]
    pub entitlements: PlanEntitlements,
    /// Credits granted when the plan is purchased or renewed
    pub included_credits: i64,
}

impl PlanCatalogueEntry {
    pub fn all() -> Vec<Self> {
        PlanName::ALL
            .iter()
            .map(|plan| Self {
                entitlements: plan.entitlements().clone(),
                included_credits: crate::credits::credits_for_plan(*plan),
            })
            .collect()
    }
}
