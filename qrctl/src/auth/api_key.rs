//! Bearer API key authentication for the public `/api/v1` surface.

use std::sync::{Arc, OnceLock};

use axum::{
    extract::{FromRequestParts, MatchedPath},
    http::{header, request::Parts},
};
use chrono::Utc;
use tracing::{instrument, trace, warn};

use crate::{
    AppState, crypto,
    db::handlers::ApiKeys,
    errors::{Error, Result},
    rate_limit,
    types::{ApiKeyId, Operation, OrganizationId, Permission, UserId, abbrev_uuid},
};

pub const SCOPE_ALL: &str = "*";

/// Every scope a key may carry
pub const SCOPES: [&str; 8] = [
    "qr:read",
    "qr:write",
    "qr:delete",
    "scan:read",
    "webhook:read",
    "webhook:write",
    "webhook:delete",
    SCOPE_ALL,
];

pub fn has_scope(scopes: &[String], scope: &str) -> bool {
    scopes.iter().any(|s| s == scope || s == SCOPE_ALL)
}

/// Reject any scope outside [`SCOPES`]
pub fn validate_scopes(scopes: &[String]) -> Result<()> {
    if scopes.is_empty() {
        return Err(Error::BadRequest {
            message: "At least one scope is required".to_string(),
        });
    }
    match scopes.iter().find(|s| !SCOPES.contains(&s.as_str())) {
        Some(unknown) => Err(Error::BadRequest {
            message: format!("Unknown scope: {unknown}"),
        }),
        None => Ok(()),
    }
}

/// A verified API key. Exactly one of `user_id` / `organization_id` is set.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    pub key_id: ApiKeyId,
    pub user_id: Option<UserId>,
    pub organization_id: Option<OrganizationId>,
    pub scopes: Vec<String>,
}

impl ApiKeyAuth {
    pub fn has_scope(&self, scope: &str) -> bool {
        has_scope(&self.scopes, scope)
    }

    pub fn require_scope(&self, scope: &str) -> Result<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(Error::InsufficientPermissions {
                required: Permission::Scope(scope.to_string()),
                action: Operation::Read,
                resource: format!("scope {scope}"),
            })
        }
    }
}

/// Slot the usage-metering middleware places in request extensions; the
/// extractor fills it so the middleware can attribute the request afterwards.
#[derive(Debug, Clone, Default)]
pub struct ApiKeySlot(pub Arc<OnceLock<ApiKeyAuth>>);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(token) = bearer_token(parts) else {
            return Err(Error::Unauthenticated {
                message: Some("Missing or invalid Authorization header".to_string()),
            });
        };

        let invalid = || Error::Unauthenticated {
            message: Some("Invalid or expired API key".to_string()),
        };

        let now = Utc::now();
        let mut conn = state.db.acquire().await?;
        let mut keys = ApiKeys::new(&mut conn);
        let key = keys
            .get_by_hash(&crypto::hash_api_key(token))
            .await?
            .filter(|k| k.is_usable(now))
            .ok_or_else(invalid)?;

        if let Err(e) = keys.touch_last_used(key.id, now).await {
            warn!(api_key_id = %abbrev_uuid(&key.id), error = %e, "Failed to update key last_used_at");
        }
        drop(conn);

        let route = parts
            .extensions
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        rate_limit::check(&state.db, &state.config.rate_limit, &key.id.to_string(), &route).await?;

        let auth = ApiKeyAuth {
            key_id: key.id,
            user_id: key.user_id,
            organization_id: key.organization_id,
            scopes: key.scopes,
        };
        if let Some(slot) = parts.extensions.get::<ApiKeySlot>() {
            let _ = slot.0.set(auth.clone());
        }
        trace!(api_key_id = %abbrev_uuid(&auth.key_id), "API key authenticated");
        Ok(auth)
    }
}
