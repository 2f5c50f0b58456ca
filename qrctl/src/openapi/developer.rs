//! OpenAPI documentation for the developer API (`/api/v1/*`).

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api::handlers::v1;

struct BearerKeyAddon;

impl Modify for BearerKeyAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "BearerAuth".to_string(),
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("API Key")
                    .description(Some(
                        "API key authentication. Include your key in the `Authorization` header:\n\n\
                        ```\nAuthorization: Bearer sk_...\n```\n\n\
                        Keys are created and rotated from the dashboard.",
                    ))
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        v1::list_qr_codes,
        v1::create_qr_code,
        v1::get_qr_code,
        v1::update_qr_code,
        v1::delete_qr_code,
        v1::list_scans,
        v1::get_usage,
        v1::get_webhook,
        v1::configure_webhook,
        v1::delete_webhook,
        v1::webhook_logs,
        v1::list_plans,
    ),
    modifiers(&BearerKeyAddon),
    tags(
        (name = "v1", description = "QR codes, scans, usage and scan webhooks for API key holders."),
    ),
    info(
        title = "qrctl Developer API",
        version = "1.0.0",
        description = "Programmatic access to QR codes.

## Scopes

Each key carries scopes such as `qr:read`, `qr:write`, `scan:read` and `webhook:write`, or `*` for everything. \
Requests outside a key's scopes fail with `403`.

## Webhooks

Scan events are delivered as signed `POST` requests. Verify the `X-Webhook-Signature` header, \
an HMAC-SHA256 of the raw body keyed with the secret returned when the webhook was configured.",
    ),
)]
pub struct DeveloperApiDoc;
