//! OpenAPI documentation for the dashboard API.
//!
//! Covers `/auth/*`, `/api/me`, the public scan endpoint, inbound provider webhooks and
//! everything nested under `/api`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::api::handlers;

struct SessionCookieAddon;

impl Modify for SessionCookieAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "SessionCookie".to_string(),
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                "qrctl_session",
                "Session JWT set by `/auth/login` and `/auth/register`.",
            ))),
        );
    }
}

/// Routes mounted under `/api`
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::qr_codes::list_qr_codes,
        handlers::qr_codes::create_qr_code,
        handlers::qr_codes::get_qr_code,
        handlers::qr_codes::update_qr_code,
        handlers::qr_codes::delete_qr_code,
        handlers::qr_codes::get_analytics,
        handlers::billing::get_subscription,
        handlers::billing::get_access,
        handlers::billing::list_invoices,
        handlers::billing::get_credits,
        handlers::payments::create_order,
        handlers::payments::verify_payment,
        handlers::payments::payment_status,
        handlers::api_keys::list_api_keys,
        handlers::api_keys::create_api_key,
        handlers::api_keys::rotate_api_key,
        handlers::api_keys::revoke_api_key,
        handlers::api_keys::get_api_key_usage,
        handlers::organizations::create_organization,
        handlers::organizations::list_organizations,
        handlers::organizations::get_organization,
        handlers::organizations::update_organization,
        handlers::organizations::delete_organization,
        handlers::organizations::list_members,
        handlers::organizations::add_member,
        handlers::organizations::update_member_role,
        handlers::organizations::remove_member,
        handlers::organizations::transfer_ownership,
        handlers::organizations::accept_invitation,
        handlers::notifications::list_notifications,
        handlers::notifications::mark_notification_read,
        handlers::notifications::mark_all_notifications_read,
        handlers::notifications::delete_notification,
        handlers::custom_domains::manage_domain,
        handlers::custom_domains::list_domains,
        handlers::admin::get_stats,
        handlers::admin::list_users,
        handlers::admin::get_user,
        handlers::admin::lock_user,
        handlers::admin::unlock_user,
        handlers::admin::adjust_billing,
    ),
    security(("SessionCookie" = []))
)]
struct ApiRoutes;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::logout,
        handlers::auth::get_me,
        handlers::scan::record_scan,
        handlers::billing::billing_webhook,
        handlers::payments::payment_webhook,
    ),
    nest((path = "/api", api = ApiRoutes)),
    modifiers(&SessionCookieAddon),
    tags(
        (name = "authentication", description = "Registration, login and the session cookie."),
        (name = "qr_codes", description = "Create and manage QR codes. Creation is limited by plan and credits."),
        (name = "scans", description = "Public scan recording. Scans are rate limited per QR code and client address."),
        (name = "billing", description = "Subscription state, invoices, credits and the billing provider webhook."),
        (name = "payments", description = "One-off credit purchases."),
        (name = "api_keys", description = "Developer API keys, rotation and usage."),
        (name = "organizations", description = "Organizations, members and invitations."),
        (name = "notifications", description = "In-app notifications."),
        (name = "custom_domains", description = "Custom short-link domains verified over DNS."),
        (name = "admin", description = "Platform administration. Requires an admin account."),
    ),
    info(
        title = "qrctl Dashboard API",
        version = "1.0.0",
        description = "API backing the qrctl dashboard.

## Authentication

Log in with `POST /auth/login`; the response sets an HTTP-only `qrctl_session` cookie which \
authenticates every `/api/*` request.

## Errors

Errors are JSON objects with an `error` message and, for plan and credit failures, a machine readable `code`:

```json
{ \"error\": \"QR code limit reached for the FREE plan\", \"code\": \"PLAN_LIMIT_QR_CODES\" }
```",
    ),
)]
pub struct DashboardApiDoc;
