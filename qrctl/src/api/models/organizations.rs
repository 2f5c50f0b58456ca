//! API models for organizations, members and invitations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::rbac::OrgRole;
use crate::db::models::organizations::{InvitationDBResponse, MemberDBResponse, OrganizationDBResponse, OrganizationWithRole};
use crate::types::{InvitationId, OrganizationId, UserId};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OrganizationCreate {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OrganizationUpdate {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrganizationResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: OrganizationId,
    pub name: String,
    pub slug: String,
    #[schema(value_type = String, format = "uuid")]
    pub owner_id: UserId,
    /// The caller's role, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<OrgRole>,
    pub created_at: DateTime<Utc>,
}

impl OrganizationResponse {
    pub fn with_role(org: OrganizationDBResponse, role: Option<OrgRole>) -> Self {
        Self {
            id: org.id,
            name: org.name,
            slug: org.slug,
            owner_id: org.owner_id,
            role,
            created_at: org.created_at,
        }
    }
}

impl From<OrganizationWithRole> for OrganizationResponse {
    fn from(org: OrganizationWithRole) -> Self {
        Self {
            role: org.role.parse().ok(),
            id: org.id,
            name: org.name,
            slug: org.slug,
            owner_id: org.owner_id,
            created_at: org.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MemberResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub role: OrgRole,
    pub joined_at: DateTime<Utc>,
}

impl From<MemberDBResponse> for MemberResponse {
    fn from(db: MemberDBResponse) -> Self {
        Self {
            role: db.role(),
            user_id: db.user_id,
            email: db.email,
            display_name: db.display_name,
            joined_at: db.created_at,
        }
    }
}

/// Add an existing user by id, or invite someone by email
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MemberAdd {
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub role: Option<OrgRole>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MemberRoleUpdate {
    pub role: OrgRole,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TransferOwnership {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InvitationResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: InvitationId,
    pub email: String,
    pub role: String,
    pub expires_at: DateTime<Utc>,
    pub invite_link: String,
}

impl InvitationResponse {
    pub fn new(invitation: InvitationDBResponse, invite_link: String) -> Self {
        Self {
            id: invitation.id,
            email: invitation.email,
            role: invitation.role,
            expires_at: invitation.expires_at,
            invite_link,
        }
    }
}

/// Outcome of `POST /organizations/{id}/members`
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemberAddResponse {
    Added { member: MemberAddedInfo },
    Invited { invitation: InvitationResponse },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MemberAddedInfo {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub role: OrgRole,
}
