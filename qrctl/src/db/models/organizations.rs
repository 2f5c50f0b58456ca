//! Database models for organizations, memberships and invitations.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::auth::rbac::OrgRole;
use crate::types::{InvitationId, OrganizationId, UserId};

#[derive(Debug, Clone, FromRow)]
pub struct OrganizationDBResponse {
    pub id: OrganizationId,
    pub name: String,
    pub slug: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// An organization as seen by one of its members
#[derive(Debug, Clone, FromRow)]
pub struct OrganizationWithRole {
    pub id: OrganizationId,
    pub name: String,
    pub slug: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct OrganizationCreateDBRequest {
    pub name: String,
    pub slug: String,
    pub owner_id: UserId,
}

#[derive(Debug, Clone)]
pub struct OrganizationUpdateDBRequest {
    pub name: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MemberDBResponse {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub email: String,
    pub display_name: Option<String>,
}

impl MemberDBResponse {
    pub fn role(&self) -> OrgRole {
        self.role.parse().unwrap_or(OrgRole::Member)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct InvitationDBResponse {
    pub id: InvitationId,
    pub organization_id: OrganizationId,
    pub email: String,
    pub role: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub invited_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InvitationCreateDBRequest {
    pub organization_id: OrganizationId,
    pub email: String,
    pub role: OrgRole,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub invited_by: UserId,
}
