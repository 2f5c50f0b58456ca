//! Custom domains: register, prove ownership over DNS, remove.

use axum::{Json, extract::State};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    AppState,
    api::models::{
        custom_domains::{CustomDomainResponse, DomainAction, DomainActionResponse, DomainRequest, VerificationInstructions},
        users::CurrentUser,
    },
    crypto,
    db::{handlers::CustomDomains, models::notifications::NotificationCreateDBRequest},
    domains,
    entitlements::{Feature, assert_feature},
    errors::{Error, Result},
    notifications::{NotificationType, notify},
};

static DOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9-]{1,61}[a-zA-Z0-9]\.[a-zA-Z]{2,}$").expect("static regex is valid"));

fn normalize_domain(domain: &str) -> Result<String> {
    let domain = domain.trim().to_lowercase();
    if DOMAIN.is_match(&domain) {
        Ok(domain)
    } else {
        Err(Error::BadRequest {
            message: "Invalid domain format".to_string(),
        })
    }
}

fn domain_not_found(domain: &str) -> Error {
    Error::NotFound {
        resource: "Domain".to_string(),
        id: domain.to_string(),
    }
}

#[utoipa::path(
    post,
    path = "/custom-domains",
    tag = "custom_domains",
    request_body = DomainRequest,
    responses(
        (status = 200, body = DomainActionResponse),
        (status = 400, description = "Invalid domain, already registered, or verification failed"),
        (status = 403, description = "Plan does not include custom domains"),
        (status = 404, description = "Domain not found"),
    )
)]
#[tracing::instrument(skip_all, fields(action = ?request.action))]
pub async fn manage_domain(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<DomainRequest>,
) -> Result<Json<DomainActionResponse>> {
    assert_feature(current_user.plan, Feature::CustomDomains)?;
    let domain = normalize_domain(&request.domain)?;

    let mut conn = state.db.acquire().await?;
    match request.action {
        DomainAction::Add => {
            if let Some(existing) = CustomDomains::new(&mut conn).get_by_domain(&domain).await? {
                let message = if existing.user_id == current_user.id {
                    "Domain already exists in your account"
                } else {
                    "Domain is already in use by another user"
                };
                return Err(Error::BadRequest { message: message.to_string() });
            }

            let row = CustomDomains::new(&mut conn)
                .create(current_user.id, &domain, &crypto::random_hex_token(32))
                .await?;
            info!(domain = %row.domain, "Custom domain added");
            Ok(Json(DomainActionResponse {
                success: true,
                message: "Domain added. Publish the TXT record, then verify.".to_string(),
                instructions: Some(VerificationInstructions::for_domain(&row)),
                domain: Some(row.into()),
            }))
        }

        DomainAction::Verify => {
            let row = CustomDomains::new(&mut conn)
                .get_by_domain(&domain)
                .await?
                .filter(|d| d.user_id == current_user.id)
                .ok_or_else(|| domain_not_found(&domain))?;

            if row.is_verified {
                return Ok(Json(DomainActionResponse {
                    success: true,
                    message: "Domain is already verified".to_string(),
                    domain: Some(row.into()),
                    instructions: None,
                }));
            }

            // Don't hold a pooled connection across DNS retries
            drop(conn);
            let expected = row.expected_txt_value();
            let outcome = domains::verify_txt(&state.http_client, &state.config.domains, &row.domain, &expected).await;

            let mut conn = state.db.acquire().await?;
            match outcome {
                Ok(()) => {
                    let verified = CustomDomains::new(&mut conn).mark_verified(row.id).await?;
                    notify(
                        &mut conn,
                        NotificationCreateDBRequest::new(
                            current_user.id,
                            NotificationType::DomainVerified,
                            "Domain verified",
                            format!("{} is now verified and ready to use.", verified.domain),
                        )
                        .with_metadata(json!({ "domain": verified.domain })),
                    )
                    .await;
                    info!(domain = %verified.domain, "Custom domain verified");
                    Ok(Json(DomainActionResponse {
                        success: true,
                        message: "Domain verified".to_string(),
                        domain: Some(verified.into()),
                        instructions: None,
                    }))
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!(domain = %row.domain, error = %reason, "Custom domain verification failed");
                    CustomDomains::new(&mut conn).record_check_failure(row.id, &reason).await?;
                    Err(Error::BadRequest {
                        message: format!("Verification failed: {reason}"),
                    })
                }
            }
        }

        DomainAction::Remove => {
            if !CustomDomains::new(&mut conn).delete_for_user(current_user.id, &domain).await? {
                return Err(domain_not_found(&domain));
            }
            info!(%domain, "Custom domain removed");
            Ok(Json(DomainActionResponse {
                success: true,
                message: "Domain removed".to_string(),
                domain: None,
                instructions: None,
            }))
        }
    }
}

#[utoipa::path(
    get,
    path = "/custom-domains",
    tag = "custom_domains",
    responses((status = 200, body = [CustomDomainResponse]))
)]
#[tracing::instrument(skip_all)]
pub async fn list_domains(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<CustomDomainResponse>>> {
    let mut conn = state.db.acquire().await?;
    let rows = CustomDomains::new(&mut conn).list_for_user(current_user.id).await?;
    Ok(Json(rows.into_iter().map(CustomDomainResponse::from).collect()))
}
