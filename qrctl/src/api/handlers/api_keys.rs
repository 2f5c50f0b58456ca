//! Session-authenticated management of developer API keys.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sqlx::PgConnection;
use tracing::info;

use crate::{
    AppState,
    api::models::{
        api_keys::{ApiKeyCreate, ApiKeyCreatedResponse, ApiKeyResponse, ApiKeyRotate, ApiUsageResponse, UsageQuery},
        users::CurrentUser,
    },
    auth::api_key::validate_scopes,
    crypto,
    db::{
        handlers::{ApiKeys, ApiUsage, Organizations},
        models::api_keys::{ApiKeyCreateDBRequest, ApiKeyDBResponse},
    },
    errors::{Error, Result},
    types::{ApiKeyId, OrganizationId, Operation, Permission, Resource, UserId, abbrev_uuid},
};

fn not_found(id: ApiKeyId) -> Error {
    Error::NotFound {
        resource: "API key".to_string(),
        id: id.to_string(),
    }
}

/// Owner or admin of the organization
async fn can_manage_org_keys(conn: &mut PgConnection, org_id: OrganizationId, user_id: UserId) -> Result<bool> {
    Ok(Organizations::new(conn)
        .get_member_role(org_id, user_id)
        .await?
        .is_some_and(|role| role.can_manage_members()))
}

/// Load a key the caller may manage; others' keys look like missing ones
async fn load_manageable(conn: &mut PgConnection, user_id: UserId, id: ApiKeyId) -> Result<ApiKeyDBResponse> {
    let key = ApiKeys::new(conn).get_by_id(id).await?.ok_or_else(|| not_found(id))?;
    let allowed = match (key.user_id, key.organization_id) {
        (Some(owner), _) => owner == user_id,
        (None, Some(org_id)) => can_manage_org_keys(conn, org_id, user_id).await?,
        (None, None) => false,
    };
    if allowed { Ok(key) } else { Err(not_found(id)) }
}

fn new_key_request(
    name: String,
    scopes: Vec<String>,
    user_id: Option<UserId>,
    organization_id: Option<OrganizationId>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    rotated_from_id: Option<ApiKeyId>,
) -> (String, ApiKeyCreateDBRequest) {
    let plain = crypto::generate_api_key();
    let request = ApiKeyCreateDBRequest {
        name,
        key_hash: crypto::hash_api_key(&plain),
        key_prefix: crypto::display_prefix(&plain),
        scopes,
        user_id,
        organization_id,
        expires_at,
        rotated_from_id,
    };
    (plain, request)
}

#[utoipa::path(
    get,
    path = "/api-keys",
    tag = "api_keys",
    responses((status = 200, body = [ApiKeyResponse]), (status = 401, description = "Not authenticated"))
)]
#[tracing::instrument(skip_all)]
pub async fn list_api_keys(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<ApiKeyResponse>>> {
    let mut conn = state.db.acquire().await?;
    let keys = ApiKeys::new(&mut conn).list_manageable(current_user.id).await?;
    Ok(Json(keys.into_iter().map(ApiKeyResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api-keys",
    tag = "api_keys",
    request_body = ApiKeyCreate,
    responses(
        (status = 201, body = ApiKeyCreatedResponse),
        (status = 400, description = "Missing name or unknown scope"),
        (status = 403, description = "Not an owner or admin of the organization"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_api_key(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ApiKeyCreate>,
) -> Result<(StatusCode, Json<ApiKeyCreatedResponse>)> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::BadRequest {
            message: "Name is required".to_string(),
        });
    }
    validate_scopes(&request.scopes)?;

    let mut conn = state.db.acquire().await?;
    let (user_id, organization_id) = match request.organization_id {
        Some(org_id) => {
            if !can_manage_org_keys(&mut conn, org_id, current_user.id).await? {
                return Err(Error::InsufficientPermissions {
                    required: Permission::Owner(Resource::Organizations),
                    action: Operation::Create,
                    resource: format!("API keys for organization {org_id}"),
                });
            }
            (None, Some(org_id))
        }
        None => (Some(current_user.id), None),
    };

    let (plain, create) = new_key_request(name, request.scopes, user_id, organization_id, request.expires_at, None);
    let key = ApiKeys::new(&mut conn).create(&create).await?;
    info!(api_key_id = %abbrev_uuid(&key.id), "API key created");

    Ok((
        StatusCode::CREATED,
        Json(ApiKeyCreatedResponse {
            key: plain,
            info: key.into(),
        }),
    ))
}

/// Issue a replacement key with the same name and scopes
#[utoipa::path(
    post,
    path = "/api-keys/{id}/rotate",
    tag = "api_keys",
    request_body = ApiKeyRotate,
    params(("id" = String, Path, description = "API key ID")),
    responses((status = 201, body = ApiKeyCreatedResponse), (status = 404, description = "Not found"))
)]
#[tracing::instrument(skip_all, fields(api_key_id = %abbrev_uuid(&id)))]
pub async fn rotate_api_key(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ApiKeyId>,
    body: Option<Json<ApiKeyRotate>>,
) -> Result<(StatusCode, Json<ApiKeyCreatedResponse>)> {
    let keep_old = body.is_some_and(|Json(b)| b.keep_old);

    let mut tx = state.db.begin().await?;
    let old = load_manageable(&mut tx, current_user.id, id).await?;
    let (plain, create) = new_key_request(old.name, old.scopes, old.user_id, old.organization_id, old.expires_at, Some(old.id));

    let mut keys = ApiKeys::new(&mut tx);
    let key = keys.create(&create).await?;
    if !keep_old {
        keys.deactivate(old.id).await?;
    }
    tx.commit().await?;
    info!(new_api_key_id = %abbrev_uuid(&key.id), keep_old, "API key rotated");

    Ok((
        StatusCode::CREATED,
        Json(ApiKeyCreatedResponse {
            key: plain,
            info: key.into(),
        }),
    ))
}

#[utoipa::path(
    delete,
    path = "/api-keys/{id}",
    tag = "api_keys",
    params(("id" = String, Path, description = "API key ID")),
    responses((status = 204, description = "Revoked"), (status = 404, description = "Not found"))
)]
#[tracing::instrument(skip_all, fields(api_key_id = %abbrev_uuid(&id)))]
pub async fn revoke_api_key(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<ApiKeyId>) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await?;
    let key = load_manageable(&mut conn, current_user.id, id).await?;
    ApiKeys::new(&mut conn).deactivate(key.id).await?;
    info!("API key revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api-keys/{id}/usage",
    tag = "api_keys",
    params(("id" = String, Path, description = "API key ID"), UsageQuery),
    responses((status = 200, body = ApiUsageResponse), (status = 404, description = "Not found"))
)]
#[tracing::instrument(skip_all, fields(api_key_id = %abbrev_uuid(&id)))]
pub async fn get_api_key_usage(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ApiKeyId>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<ApiUsageResponse>> {
    let mut conn = state.db.acquire().await?;
    let key = load_manageable(&mut conn, current_user.id, id).await?;
    let stats = ApiUsage::new(&mut conn).stats(key.id, query.from, query.to).await?;
    Ok(Json(ApiUsageResponse::new(key.id, stats)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_key_is_hashed_and_prefixed() {
        let user = uuid::Uuid::new_v4();
        let (plain, request) = new_key_request("ci".to_string(), vec!["qr:read".to_string()], Some(user), None, None, None);
        assert!(plain.starts_with("sk_"));
        assert_eq!(request.key_hash, crypto::hash_api_key(&plain));
        assert_eq!(request.key_prefix, format!("{}...", &plain[..12]));
        assert_eq!(request.user_id, Some(user));
        assert!(request.organization_id.is_none());
    }
}
