use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use tracing::info;

use crate::{
    AppState,
    api::models::{
        auth::{AuthResponse, AuthSuccessResponse, LoginRequest, RegisterRequest, WithSessionCookie},
        users::{CurrentUser, MeResponse, UserResponse},
    },
    auth::{password, session},
    db::{
        handlers::{QrCodes, Repository, Users},
        models::users::UserCreateDBRequest,
    },
    errors::Error,
    types::abbrev_uuid,
};

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn native_auth_enabled(state: &AppState) -> Result<(), Error> {
    if state.config.auth.native.enabled {
        Ok(())
    } else {
        Err(Error::BadRequest {
            message: "Native authentication is disabled".to_string(),
        })
    }
}

/// Register a new user account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "User registered successfully", body = AuthResponse),
        (status = 400, description = "Invalid input or registration disabled"),
        (status = 409, description = "User already exists"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<WithSessionCookie<AuthResponse>, Error> {
    native_auth_enabled(&state)?;
    if !state.config.auth.native.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let email = normalize_email(&request.email);
    if email.is_empty() || !email.contains('@') {
        return Err(Error::BadRequest {
            message: "A valid email address is required".to_string(),
        });
    }
    password::validate_length(&request.password, &state.config.auth.native.password)?;

    let mut tx = state.db.begin().await?;
    let mut users = Users::new(&mut tx);
    if users.get_user_by_email(&email).await?.is_some() {
        return Err(Error::Conflict {
            message: "An account with this email address already exists".to_string(),
        });
    }

    // Argon2 hashing blocks; run it off the async workers
    let params = password::Argon2Params::from(&state.config.auth.native.password);
    let plain = request.password;
    let password_hash = tokio::task::spawn_blocking(move || password::hash_string_with_params(&plain, Some(params)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })??;

    let user = users
        .create(&UserCreateDBRequest {
            email,
            display_name: request.display_name,
            password_hash: Some(password_hash),
            auth_source: "native".to_string(),
        })
        .await?;
    tx.commit().await?;

    info!(user_id = %abbrev_uuid(&user.id), "User registered");
    let current_user = CurrentUser::from(user.clone());
    let token = session::create_session_token(&current_user, &state.config)?;

    Ok(WithSessionCookie {
        status: StatusCode::CREATED,
        body: AuthResponse {
            user: UserResponse::from(user),
            message: "Registration successful".to_string(),
        },
        cookie: session::session_cookie(&token, &state.config),
    })
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account is locked"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<WithSessionCookie<AuthResponse>, Error> {
    native_auth_enabled(&state)?;

    let invalid = || Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    };

    let mut conn = state.db.acquire().await?;
    let user = Users::new(&mut conn)
        .get_user_by_email(&normalize_email(&request.email))
        .await?
        .ok_or_else(invalid)?;
    drop(conn);

    let Some(hash) = user.password_hash.clone() else {
        return Err(invalid());
    };
    let plain = request.password;
    let matches = tokio::task::spawn_blocking(move || password::verify_string(&plain, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })??;
    if !matches {
        return Err(invalid());
    }

    if user.is_locked {
        return Err(Error::Forbidden {
            message: "Account is locked".to_string(),
        });
    }

    let current_user = CurrentUser::from(user.clone());
    let token = session::create_session_token(&current_user, &state.config)?;
    info!(user_id = %abbrev_uuid(&user.id), "User logged in");

    Ok(WithSessionCookie {
        status: StatusCode::OK,
        body: AuthResponse {
            user: UserResponse::from(user),
            message: "Login successful".to_string(),
        },
        cookie: session::session_cookie(&token, &state.config),
    })
}

/// Clear the session cookie
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logged out", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> WithSessionCookie<AuthSuccessResponse> {
    WithSessionCookie {
        status: StatusCode::OK,
        body: AuthSuccessResponse {
            message: "Logged out".to_string(),
        },
        cookie: session::clear_session_cookie(&state.config),
    }
}

/// The caller with their plan, entitlements and current usage
#[utoipa::path(
    get,
    path = "/api/me",
    tag = "authentication",
    responses(
        (status = 200, body = MeResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Account is locked"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_me(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<MeResponse>, Error> {
    let mut conn = state.db.acquire().await?;
    let usage = QrCodes::new(&mut conn).usage_snapshot(current_user.id, Utc::now()).await?;
    let entitlements = current_user.plan.entitlements().clone();

    Ok(Json(MeResponse {
        user: current_user,
        entitlements,
        usage,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_config, create_test_server, create_test_state, create_test_state_with_config};
    use serde_json::json;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[tokio::test]
    async fn logout_clears_cookie() {
        let state = create_test_state();
        let cookie_name = state.config.auth.native.session.cookie_name.clone();
        let server = create_test_server(state);

        let response = server.post("/auth/logout").await;
        response.assert_status_ok();
        let set_cookie = response.header("set-cookie");
        let set_cookie = set_cookie.to_str().unwrap();
        assert!(set_cookie.starts_with(&format!("{cookie_name}=")));
        assert!(set_cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn register_rejects_short_password_before_touching_db() {
        let server = create_test_server(create_test_state());
        let response = server
            .post("/auth/register")
            .json(&json!({"email": "a@example.com", "password": "short"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn register_disabled() {
        let mut config = create_test_config();
        config.auth.native.allow_registration = false;
        let server = create_test_server(create_test_state_with_config(config));
        let response = server
            .post("/auth/register")
            .json(&json!({"email": "a@example.com", "password": "long-enough-password"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "User registration is disabled");
    }

    #[tokio::test]
    async fn me_requires_authentication() {
        let mut config = create_test_config();
        config.auth.proxy_header.enabled = false;
        let server = create_test_server(create_test_state_with_config(config));
        server.get("/api/me").await.assert_status(StatusCode::UNAUTHORIZED);
    }
}
