//! Per-request usage metering for the public `/api/v1` surface.
//!
//! The middleware places an empty [`ApiKeySlot`] in the request extensions
//! before the handler runs. The [`crate::auth::api_key::ApiKeyAuth`]
//! extractor fills it, and once the response is produced one
//! `api_usage_logs` row is written for the key. Requests that never
//! authenticated are not metered.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use metrics::{counter, histogram};
use tracing::{Instrument, debug, info_span, warn};

use crate::{
    AppState,
    auth::api_key::ApiKeySlot,
    db::{handlers::ApiUsage, models::api_keys::ApiUsageLogCreateDBRequest},
    types::abbrev_uuid,
};

/// First `x-forwarded-for` hop, falling back to `x-real-ip`
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
}

fn content_length(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

pub async fn record_api_usage(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let slot = ApiKeySlot::default();
    request.extensions_mut().insert(slot.clone());

    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let headers = request.headers();
    let request_size = content_length(headers);
    let ip_address = client_ip(headers);
    let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_string);

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();

    let Some(auth) = slot.0.get().cloned() else {
        return response;
    };

    let status = response.status().as_u16();
    counter!("qrctl_api_requests_total", "status" => status.to_string()).increment(1);
    histogram!("qrctl_api_request_duration_seconds").record(elapsed.as_secs_f64());

    let log = ApiUsageLogCreateDBRequest {
        api_key_id: auth.key_id,
        user_id: auth.user_id,
        organization_id: auth.organization_id,
        endpoint,
        method,
        status_code: i32::from(status),
        request_size,
        response_size: content_length(response.headers()),
        response_time_ms: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        ip_address,
        user_agent,
    };

    // Write after the response is handed back; failures only get logged
    let db = state.db.clone();
    let span = info_span!("record_api_usage", api_key_id = %abbrev_uuid(&auth.key_id));
    tokio::spawn(
        async move {
            let mut conn = match db.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to acquire connection for usage log");
                    return;
                }
            };
            match ApiUsage::new(&mut conn).record(&log).await {
                Ok(()) => debug!(endpoint = %log.endpoint, status = log.status_code, "API usage recorded"),
                Err(e) => warn!(error = %e, "Failed to record API usage"),
            }
        }
        .instrument(span),
    );

    response
}
