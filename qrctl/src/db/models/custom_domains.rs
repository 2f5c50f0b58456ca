//! Database models for custom domains.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{DomainId, UserId};

#[derive(Debug, Clone, FromRow)]
pub struct CustomDomainDBResponse {
    pub id: DomainId,
    pub user_id: UserId,
    pub domain: String,
    pub verification_token: String,
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub ssl_enabled: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CustomDomainDBResponse {
    /// Value the TXT record must contain
    pub fn expected_txt_value(&self) -> String {
        format!("{}.{}", self.verification_token, self.domain)
    }
}
