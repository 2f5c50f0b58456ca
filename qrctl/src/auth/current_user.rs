use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    db::{
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserDBResponse},
    },
    errors::{Error, Result},
    types::{Operation, Permission, abbrev_uuid},
};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use sqlx::PgPool;
use tracing::{debug, instrument, trace};

/// Find the session token among the request cookies
pub(crate) fn session_token_from_cookies<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|c| c.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value)
        .filter(|v| !v.is_empty())
}

/// Resolve the user from the JWT session cookie.
/// Returns:
/// - None: no cookie, or a token that does not verify
/// - Some(Ok(user)): valid token for an existing user
/// - Some(Err(error)): the user lookup failed
#[instrument(skip(parts, config, db))]
async fn try_jwt_session_auth(parts: &Parts, config: &Config, db: &PgPool) -> Option<Result<UserDBResponse>> {
    let token = session_token_from_cookies(&parts.headers, &config.auth.native.session.cookie_name)?;

    // Expired or forged tokens are expected; they just don't authenticate
    let claims = match session::verify_session_token(token, config) {
        Ok(claims) => claims,
        Err(e) => {
            trace!("Session token rejected: {e}");
            return None;
        }
    };

    let mut conn = match db.acquire().await {
        Ok(conn) => conn,
        Err(e) => return Some(Err(e.into())),
    };
    match Users::new(&mut conn).get_by_id(claims.sub).await {
        Ok(Some(user)) => Some(Ok(user)),
        Ok(None) => None,
        Err(e) => Some(Err(e.into())),
    }
}

/// Resolve the user from the trusted proxy header, creating them if allowed.
/// Returns:
/// - None: no header, or an unknown user without auto-create
/// - Some(Ok(user)): user found or created
/// - Some(Err(error)): lookup or creation failed
#[instrument(skip(parts, config, db))]
async fn try_proxy_header_auth(parts: &Parts, config: &Config, db: &PgPool) -> Option<Result<UserDBResponse>> {
    let email = parts
        .headers
        .get(&config.auth.proxy_header.header_name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|e| !e.is_empty())?;

    let mut conn = match db.acquire().await {
        Ok(conn) => conn,
        Err(e) => return Some(Err(e.into())),
    };
    let mut users = Users::new(&mut conn);

    match users.get_user_by_email(email).await {
        Ok(Some(user)) => Some(Ok(user)),
        Ok(None) if config.auth.proxy_header.auto_create_users => {
            let request = UserCreateDBRequest {
                email: email.to_string(),
                display_name: None,
                password_hash: None,
                auth_source: "proxy-header".to_string(),
            };
            match users.create(&request).await {
                Ok(user) => {
                    debug!(user_id = %abbrev_uuid(&user.id), "Auto-created user from proxy header");
                    Some(Ok(user))
                }
                Err(e) => Some(Err(e.into())),
            }
        }
        Ok(None) => None,
        Err(e) => Some(Err(e.into())),
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let mut resolved = None;

        if state.config.auth.native.enabled {
            resolved = try_jwt_session_auth(parts, &state.config, &state.db).await.transpose()?;
        }

        if resolved.is_none() && state.config.auth.proxy_header.enabled {
            resolved = try_proxy_header_auth(parts, &state.config, &state.db).await.transpose()?;
        }

        let Some(user) = resolved else {
            trace!("No authentication credentials found in request");
            return Err(Error::Unauthenticated { message: None });
        };

        if user.is_locked {
            debug!(user_id = %abbrev_uuid(&user.id), "Locked user rejected");
            return Err(Error::Forbidden {
                message: match &user.lock_reason {
                    Some(reason) => format!("Account is locked: {reason}"),
                    None => "Account is locked".to_string(),
                },
            });
        }

        Ok(CurrentUser::from(user))
    }
}

/// Whether the caller may use the admin surface
pub fn is_admin(user: &CurrentUser, config: &Config) -> bool {
    user.is_admin || config.is_admin_email(&user.email)
}

/// A [`CurrentUser`] that passed the admin check
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !is_admin(&user, &state.config) {
            return Err(Error::InsufficientPermissions {
                required: Permission::Admin,
                action: Operation::Manage,
                resource: "admin".to_string(),
            });
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::PlanName;
    use crate::test_utils::{create_test_config, create_test_state};
    use axum::http::{HeaderValue, Request};
    use uuid::Uuid;

    fn parts_with_headers(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("http://localhost/api/me");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; qrctl_session=tok123; other=1"));
        assert_eq!(session_token_from_cookies(&headers, "qrctl_session"), Some("tok123"));
        assert_eq!(session_token_from_cookies(&headers, "missing"), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("qrctl_session="));
        assert_eq!(session_token_from_cookies(&headers, "qrctl_session"), None);
    }

    #[tokio::test]
    async fn no_credentials_is_unauthenticated() {
        let state = create_test_state();
        let mut parts = parts_with_headers(&[]);
        let result = CurrentUser::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[tokio::test]
    async fn invalid_session_cookie_is_unauthenticated() {
        let state = create_test_state();
        let cookie = format!("{}=not-a-jwt", state.config.auth.native.session.cookie_name);
        let mut parts = parts_with_headers(&[("cookie", &cookie)]);
        let result = CurrentUser::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn admin_by_flag_or_allow_list() {
        let mut config = create_test_config();
        config.admin_emails = vec!["Boss@Example.com".to_string()];
        let mut user = CurrentUser {
            id: Uuid::new_v4(),
            email: "boss@example.com".to_string(),
            display_name: None,
            is_admin: false,
            plan: PlanName::Free,
            credits: 0,
        };
        assert!(is_admin(&user, &config));

        user.email = "someone@example.com".to_string();
        assert!(!is_admin(&user, &config));

        user.is_admin = true;
        assert!(is_admin(&user, &config));
    }
}
