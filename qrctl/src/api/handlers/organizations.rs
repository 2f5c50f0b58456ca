//! Organizations, memberships, ownership transfer and invitations.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::PgConnection;
use tracing::{info, warn};

use crate::{
    AppState,
    api::models::{
        organizations::{
            InvitationResponse, MemberAdd, MemberAddResponse, MemberAddedInfo, MemberResponse, MemberRoleUpdate, OrganizationCreate,
            OrganizationResponse, OrganizationUpdate, TransferOwnership,
        },
        users::CurrentUser,
    },
    auth::rbac::OrgRole,
    crypto,
    db::{
        handlers::{Organizations, Repository, Users},
        models::organizations::{InvitationCreateDBRequest, OrganizationCreateDBRequest, OrganizationUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{OrganizationId, Operation, Permission, UserId, abbrev_uuid},
};

static SLUG: Lazy<Regex> = Lazy::new(|| Regex::new("^[a-z0-9_-]+$").expect("static regex is valid"));

pub const INVITATION_TTL: Duration = Duration::days(7);

fn validate_slug(slug: &str) -> Result<()> {
    if SLUG.is_match(slug) {
        Ok(())
    } else {
        Err(Error::BadRequest {
            message: "Slug may only contain lowercase letters, digits, '-' and '_'".to_string(),
        })
    }
}

fn org_not_found(id: OrganizationId) -> Error {
    Error::NotFound {
        resource: "Organization".to_string(),
        id: id.to_string(),
    }
}

fn denied(action: Operation, org_id: OrganizationId, required: OrgRole) -> Error {
    Error::InsufficientPermissions {
        required: Permission::OrgRole(required),
        action,
        resource: format!("organization {org_id}"),
    }
}

/// The caller's role, or 403 when they are not a member
async fn require_member(conn: &mut PgConnection, org_id: OrganizationId, user_id: UserId) -> Result<OrgRole> {
    Organizations::new(conn)
        .get_member_role(org_id, user_id)
        .await?
        .filter(OrgRole::can_access)
        .ok_or_else(|| denied(Operation::Read, org_id, OrgRole::Member))
}

async fn require_member_manager(conn: &mut PgConnection, org_id: OrganizationId, user_id: UserId) -> Result<OrgRole> {
    let role = require_member(conn, org_id, user_id).await?;
    if role.can_manage_members() {
        Ok(role)
    } else {
        Err(denied(Operation::Manage, org_id, OrgRole::Admin))
    }
}

async fn require_owner(conn: &mut PgConnection, org_id: OrganizationId, user_id: UserId, action: Operation) -> Result<()> {
    let role = require_member(conn, org_id, user_id).await?;
    if role.can_manage_settings() {
        Ok(())
    } else {
        Err(denied(action, org_id, OrgRole::Owner))
    }
}

fn reject_owner_role(role: OrgRole) -> Result<()> {
    if role == OrgRole::Owner {
        Err(Error::BadRequest {
            message: "Use transfer ownership endpoint".to_string(),
        })
    } else {
        Ok(())
    }
}

#[utoipa::path(
    post,
    path = "/organizations",
    tag = "organizations",
    request_body = OrganizationCreate,
    responses(
        (status = 201, body = OrganizationResponse),
        (status = 400, description = "Missing name or invalid slug"),
        (status = 409, description = "Slug already taken"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_organization(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<OrganizationCreate>,
) -> Result<(StatusCode, Json<OrganizationResponse>)> {
    let name = request.name.trim().to_string();
    let slug = request.slug.trim().to_string();
    if name.is_empty() || slug.is_empty() {
        return Err(Error::BadRequest {
            message: "Name and slug are required".to_string(),
        });
    }
    validate_slug(&slug)?;

    let mut conn = state.db.acquire().await?;
    let org = Organizations::new(&mut conn)
        .create(&OrganizationCreateDBRequest {
            name,
            slug,
            owner_id: current_user.id,
        })
        .await?;
    info!(organization_id = %abbrev_uuid(&org.id), "Organization created");

    Ok((StatusCode::CREATED, Json(OrganizationResponse::with_role(org, Some(OrgRole::Owner)))))
}

#[utoipa::path(
    get,
    path = "/organizations",
    tag = "organizations",
    responses((status = 200, body = [OrganizationResponse]))
)]
#[tracing::instrument(skip_all)]
pub async fn list_organizations(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<OrganizationResponse>>> {
    let mut conn = state.db.acquire().await?;
    let orgs = Organizations::new(&mut conn).list_for_user(current_user.id).await?;
    Ok(Json(orgs.into_iter().map(OrganizationResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/organizations/{id}",
    tag = "organizations",
    params(("id" = String, Path, description = "Organization ID")),
    responses((status = 200, body = OrganizationResponse), (status = 403, description = "Not a member"), (status = 404, description = "Not found"))
)]
#[tracing::instrument(skip_all, fields(organization_id = %abbrev_uuid(&id)))]
pub async fn get_organization(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<OrganizationId>,
) -> Result<Json<OrganizationResponse>> {
    let mut conn = state.db.acquire().await?;
    let org = Organizations::new(&mut conn).get_by_id(id).await?.ok_or_else(|| org_not_found(id))?;
    let role = require_member(&mut conn, id, current_user.id).await?;
    Ok(Json(OrganizationResponse::with_role(org, Some(role))))
}

#[utoipa::path(
    patch,
    path = "/organizations/{id}",
    tag = "organizations",
    request_body = OrganizationUpdate,
    params(("id" = String, Path, description = "Organization ID")),
    responses((status = 200, body = OrganizationResponse), (status = 403, description = "Owner only"))
)]
#[tracing::instrument(skip_all, fields(organization_id = %abbrev_uuid(&id)))]
pub async fn update_organization(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<OrganizationId>,
    Json(request): Json<OrganizationUpdate>,
) -> Result<Json<OrganizationResponse>> {
    let name = request.name.map(|n| n.trim().to_string());
    if name.as_deref().is_some_and(str::is_empty) {
        return Err(Error::BadRequest {
            message: "Name cannot be empty".to_string(),
        });
    }

    let mut conn = state.db.acquire().await?;
    require_owner(&mut conn, id, current_user.id, Operation::Update).await?;
    let org = Organizations::new(&mut conn).update(id, &OrganizationUpdateDBRequest { name }).await?;
    Ok(Json(OrganizationResponse::with_role(org, Some(OrgRole::Owner))))
}

#[utoipa::path(
    delete,
    path = "/organizations/{id}",
    tag = "organizations",
    params(("id" = String, Path, description = "Organization ID")),
    responses((status = 204, description = "Deleted"), (status = 403, description = "Owner only"))
)]
#[tracing::instrument(skip_all, fields(organization_id = %abbrev_uuid(&id)))]
pub async fn delete_organization(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<OrganizationId>) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await?;
    require_owner(&mut conn, id, current_user.id, Operation::Delete).await?;
    if !Organizations::new(&mut conn).delete(id).await? {
        return Err(org_not_found(id));
    }
    info!("Organization deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/organizations/{id}/members",
    tag = "organizations",
    params(("id" = String, Path, description = "Organization ID")),
    responses((status = 200, body = [MemberResponse]), (status = 403, description = "Not a member"))
)]
#[tracing::instrument(skip_all, fields(organization_id = %abbrev_uuid(&id)))]
pub async fn list_members(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<OrganizationId>,
) -> Result<Json<Vec<MemberResponse>>> {
    let mut conn = state.db.acquire().await?;
    require_member(&mut conn, id, current_user.id).await?;
    let members = Organizations::new(&mut conn).list_members(id).await?;
    Ok(Json(members.into_iter().map(MemberResponse::from).collect()))
}

/// Add a user directly, or invite by email
#[utoipa::path(
    post,
    path = "/organizations/{id}/members",
    tag = "organizations",
    request_body = MemberAdd,
    params(("id" = String, Path, description = "Organization ID")),
    responses(
        (status = 201, body = MemberAddResponse),
        (status = 400, description = "Owner role requested, or neither user_id nor email"),
        (status = 403, description = "Owner or admin only"),
    )
)]
#[tracing::instrument(skip_all, fields(organization_id = %abbrev_uuid(&id)))]
pub async fn add_member(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<OrganizationId>,
    Json(request): Json<MemberAdd>,
) -> Result<(StatusCode, Json<MemberAddResponse>)> {
    let role = request.role.unwrap_or(OrgRole::Member);
    reject_owner_role(role)?;

    let mut conn = state.db.acquire().await?;
    require_member_manager(&mut conn, id, current_user.id).await?;

    if let Some(user_id) = request.user_id {
        if Users::new(&mut conn).get_by_id(user_id).await?.is_none() {
            return Err(Error::NotFound {
                resource: "User".to_string(),
                id: user_id.to_string(),
            });
        }
        if Organizations::new(&mut conn).get_member_role(id, user_id).await? == Some(OrgRole::Owner) {
            return Err(Error::BadRequest {
                message: "Cannot change the owner's role".to_string(),
            });
        }
        Organizations::new(&mut conn).upsert_member(id, user_id, role).await?;
        info!(user_id = %abbrev_uuid(&user_id), role = %role, "Member added");
        return Ok((
            StatusCode::CREATED,
            Json(MemberAddResponse::Added {
                member: MemberAddedInfo { user_id, role },
            }),
        ));
    }

    let Some(email) = request.email.map(|e| e.trim().to_lowercase()).filter(|e| e.contains('@')) else {
        return Err(Error::BadRequest {
            message: "Either user_id or a valid email is required".to_string(),
        });
    };

    let mut orgs = Organizations::new(&mut conn);
    let org = orgs.get_by_id(id).await?.ok_or_else(|| org_not_found(id))?;
    let invitation = orgs
        .create_invitation(&InvitationCreateDBRequest {
            organization_id: id,
            email: email.clone(),
            role,
            token: crypto::random_hex_token(32),
            expires_at: Utc::now() + INVITATION_TTL,
            invited_by: current_user.id,
        })
        .await?;
    let link = format!("{}/invite/{}", state.config.public_base_url.trim_end_matches('/'), invitation.token);

    if let Some(email_service) = state.email.as_deref() {
        if let Err(e) = email_service.send_invitation_email(&email, &org.name, &link).await {
            warn!(error = %e, "Failed to send invitation email");
        }
    }
    info!(invitation_id = %abbrev_uuid(&invitation.id), "Invitation created");

    Ok((
        StatusCode::CREATED,
        Json(MemberAddResponse::Invited {
            invitation: InvitationResponse::new(invitation, link),
        }),
    ))
}

#[utoipa::path(
    patch,
    path = "/organizations/{id}/members/{user_id}",
    tag = "organizations",
    request_body = MemberRoleUpdate,
    params(("id" = String, Path, description = "Organization ID"), ("user_id" = String, Path, description = "Member user ID")),
    responses((status = 204, description = "Role updated"), (status = 400, description = "Owner role involved"), (status = 404, description = "Not a member"))
)]
#[tracing::instrument(skip_all, fields(organization_id = %abbrev_uuid(&id), user_id = %abbrev_uuid(&user_id)))]
pub async fn update_member_role(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((id, user_id)): Path<(OrganizationId, UserId)>,
    Json(request): Json<MemberRoleUpdate>,
) -> Result<StatusCode> {
    reject_owner_role(request.role)?;

    let mut conn = state.db.acquire().await?;
    require_member_manager(&mut conn, id, current_user.id).await?;

    let mut orgs = Organizations::new(&mut conn);
    match orgs.get_member_role(id, user_id).await? {
        None => Err(Error::NotFound {
            resource: "Member".to_string(),
            id: user_id.to_string(),
        }),
        Some(OrgRole::Owner) => Err(Error::BadRequest {
            message: "Cannot change the owner's role".to_string(),
        }),
        Some(_) => {
            orgs.update_member_role(id, user_id, request.role).await?;
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

#[utoipa::path(
    delete,
    path = "/organizations/{id}/members/{user_id}",
    tag = "organizations",
    params(("id" = String, Path, description = "Organization ID"), ("user_id" = String, Path, description = "Member user ID")),
    responses((status = 204, description = "Removed"), (status = 400, description = "The owner cannot be removed"), (status = 404, description = "Not a member"))
)]
#[tracing::instrument(skip_all, fields(organization_id = %abbrev_uuid(&id), user_id = %abbrev_uuid(&user_id)))]
pub async fn remove_member(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((id, user_id)): Path<(OrganizationId, UserId)>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await?;
    if user_id == current_user.id {
        require_member(&mut conn, id, current_user.id).await?;
    } else {
        require_member_manager(&mut conn, id, current_user.id).await?;
    }

    let mut orgs = Organizations::new(&mut conn);
    match orgs.get_member_role(id, user_id).await? {
        None => Err(Error::NotFound {
            resource: "Member".to_string(),
            id: user_id.to_string(),
        }),
        Some(OrgRole::Owner) => Err(Error::BadRequest {
            message: "The owner cannot be removed".to_string(),
        }),
        Some(_) => {
            orgs.remove_member(id, user_id).await?;
            info!("Member removed");
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

#[utoipa::path(
    post,
    path = "/organizations/{id}/transfer-ownership",
    tag = "organizations",
    request_body = TransferOwnership,
    params(("id" = String, Path, description = "Organization ID")),
    responses((status = 204, description = "Ownership transferred"), (status = 400, description = "Target is not a member"), (status = 403, description = "Owner only"))
)]
#[tracing::instrument(skip_all, fields(organization_id = %abbrev_uuid(&id)))]
pub async fn transfer_ownership(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<OrganizationId>,
    Json(request): Json<TransferOwnership>,
) -> Result<StatusCode> {
    let mut tx = state.db.begin().await?;
    require_owner(&mut tx, id, current_user.id, Operation::Manage).await?;

    if request.user_id == current_user.id {
        return Err(Error::BadRequest {
            message: "You already own this organization".to_string(),
        });
    }
    let mut orgs = Organizations::new(&mut tx);
    if orgs.get_member_role(id, request.user_id).await?.is_none() {
        return Err(Error::BadRequest {
            message: "New owner must be a member of the organization".to_string(),
        });
    }
    orgs.transfer_ownership(id, current_user.id, request.user_id).await?;
    tx.commit().await?;

    info!(new_owner = %abbrev_uuid(&request.user_id), "Ownership transferred");
    Ok(StatusCode::NO_CONTENT)
}

/// Join an organization through an invitation sent to the caller's email
#[utoipa::path(
    post,
    path = "/invitations/{token}/accept",
    tag = "organizations",
    params(("token" = String, Path, description = "Invitation token")),
    responses(
        (status = 200, body = OrganizationResponse),
        (status = 400, description = "Expired or already used"),
        (status = 403, description = "Invitation was sent to a different email"),
        (status = 404, description = "Unknown token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn accept_invitation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(token): Path<String>,
) -> Result<Json<OrganizationResponse>> {
    let mut tx = state.db.begin().await?;
    let mut orgs = Organizations::new(&mut tx);
    let invitation = orgs.get_invitation_by_token(&token).await?.ok_or_else(|| Error::NotFound {
        resource: "Invitation".to_string(),
        id: "token".to_string(),
    })?;

    if !invitation.email.eq_ignore_ascii_case(&current_user.email) {
        return Err(Error::Forbidden {
            message: "This invitation was sent to a different email address".to_string(),
        });
    }
    if invitation.accepted_at.is_some() {
        return Err(Error::BadRequest {
            message: "Invitation has already been used".to_string(),
        });
    }
    if invitation.expires_at <= Utc::now() {
        return Err(Error::BadRequest {
            message: "Invitation has expired".to_string(),
        });
    }

    let role = invitation.role.parse().unwrap_or(OrgRole::Member);
    orgs.upsert_member(invitation.organization_id, current_user.id, role).await?;
    orgs.mark_invitation_accepted(invitation.id).await?;
    let org = orgs
        .get_by_id(invitation.organization_id)
        .await?
        .ok_or_else(|| org_not_found(invitation.organization_id))?;
    tx.commit().await?;

    info!(organization_id = %abbrev_uuid(&org.id), "Invitation accepted");
    Ok(Json(OrganizationResponse::with_role(org, Some(role))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs() {
        for ok in ["acme", "acme-co", "acme_2"] {
            assert!(validate_slug(ok).is_ok(), "{ok}");
        }
        for bad in ["Acme", "acme co", "acme.co", ""] {
            assert!(validate_slug(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn owner_role_only_via_transfer() {
        let err = reject_owner_role(OrgRole::Owner).unwrap_err();
        assert_eq!(err.user_message(), "Use transfer ownership endpoint");
        assert!(reject_owner_role(OrgRole::Admin).is_ok());
        assert!(reject_owner_role(OrgRole::Member).is_ok());
    }
}
