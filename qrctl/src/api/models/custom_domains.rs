//! API models for custom domains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::custom_domains::CustomDomainDBResponse;
use crate::types::DomainId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DomainAction {
    Add,
    Verify,
    Remove,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DomainRequest {
    pub domain: String,
    pub action: DomainAction,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CustomDomainResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: DomainId,
    pub domain: String,
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub ssl_enabled: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CustomDomainDBResponse> for CustomDomainResponse {
    fn from(db: CustomDomainDBResponse) -> Self {
        Self {
            id: db.id,
            domain: db.domain,
            is_verified: db.is_verified,
            verified_at: db.verified_at,
            ssl_enabled: db.ssl_enabled,
            last_checked_at: db.last_checked_at,
            last_error: db.last_error,
            created_at: db.created_at,
        }
    }
}

/// The DNS record the user has to publish
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VerificationInstructions {
    pub record_type: String,
    pub name: String,
    pub value: String,
}

impl VerificationInstructions {
    pub fn for_domain(domain: &CustomDomainDBResponse) -> Self {
        Self {
            record_type: "TXT".to_string(),
            name: domain.domain.clone(),
            value: domain.expected_txt_value(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DomainActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<CustomDomainResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<VerificationInstructions>,
}
