//! Public scan recording.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
};
use chrono::Utc;
use metrics::counter;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    AppState,
    api::models::qr_codes::{ScanRecord, ScanRecordedResponse},
    db::{
        handlers::{Notifications, QrCodes, Repository, Users},
        models::{notifications::NotificationCreateDBRequest, qr_codes::ScanCreateDBRequest},
    },
    entitlements::{PlanName, assert_within_monthly_scan_quota, month_start, scan_alert_threshold},
    errors::{Error, Result},
    metering::client_ip,
    notifications::{NotificationType, notify, scan_limit_warning_crossed},
    types::{QrCodeId, abbrev_uuid},
    webhooks::{QrWebhookEvent, enqueue_best_effort},
};

/// Coarse device class from a user agent string
pub fn device_type(user_agent: Option<&str>) -> &'static str {
    let Some(ua) = user_agent.map(str::to_lowercase) else {
        return "desktop";
    };
    if ["bot", "crawler", "spider", "curl", "wget"].iter().any(|b| ua.contains(b)) {
        "bot"
    } else if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
        "tablet"
    } else if ["mobile", "iphone", "ipod", "android", "windows phone"].iter().any(|m| ua.contains(m)) {
        "mobile"
    } else {
        "desktop"
    }
}

fn country(headers: &HeaderMap) -> Option<String> {
    ["cf-ipcountry", "x-vercel-ip-country"]
        .iter()
        .filter_map(|name| headers.get(*name)?.to_str().ok())
        .map(str::trim)
        .find(|c| !c.is_empty() && *c != "XX")
        .map(str::to_uppercase)
}

/// Record a scan and return where to send the visitor
#[utoipa::path(
    post,
    path = "/api/scan/{id}",
    tag = "scans",
    params(("id" = String, Path, description = "QR code ID")),
    request_body(content = ScanRecord, description = "Optional referrer and city"),
    responses(
        (status = 200, body = ScanRecordedResponse),
        (status = 403, description = "Inactive, expired, scan limit or monthly quota reached"),
        (status = 404, description = "Unknown QR code"),
    )
)]
#[tracing::instrument(skip_all, fields(qr_code_id = %abbrev_uuid(&id)))]
pub async fn record_scan(
    State(state): State<AppState>,
    Path(id): Path<QrCodeId>,
    headers: HeaderMap,
    body: Option<Json<ScanRecord>>,
) -> Result<(StatusCode, Json<ScanRecordedResponse>)> {
    let record = body.map(|Json(r)| r).unwrap_or_default();
    let now = Utc::now();

    let mut tx = state.db.begin().await?;
    let qr = QrCodes::new(&mut tx).get_for_update(id).await?.ok_or_else(|| Error::NotFound {
        resource: "QR code".to_string(),
        id: id.to_string(),
    })?;

    if !qr.is_active {
        return Err(Error::Forbidden {
            message: "QR code is inactive".to_string(),
        });
    }
    if qr.expires_at.is_some_and(|at| at <= now) {
        return Err(Error::Forbidden {
            message: "QR code has expired".to_string(),
        });
    }
    if qr.max_scans.is_some_and(|max| qr.scan_count >= max) {
        return Err(Error::Forbidden {
            message: "Scan limit reached".to_string(),
        });
    }

    let plan = Users::new(&mut tx)
        .get_by_id(qr.user_id)
        .await?
        .map(|u| u.plan_name())
        .unwrap_or(PlanName::Free);
    let usage = QrCodes::new(&mut tx).usage_snapshot(qr.user_id, now).await?;
    assert_within_monthly_scan_quota(plan, &usage)?;

    let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_string);
    let referrer = record
        .referrer
        .or_else(|| headers.get(header::REFERER).and_then(|v| v.to_str().ok()).map(str::to_string));

    let scan = QrCodes::new(&mut tx)
        .insert_scan(&ScanCreateDBRequest {
            qr_code_id: qr.id,
            ip_address: client_ip(&headers),
            device_type: device_type(user_agent.as_deref()).to_string(),
            user_agent,
            country: country(&headers),
            city: record.city,
            referrer,
        })
        .await?;

    let data = json!({
        "scanId": scan.id,
        "scannedAt": scan.scanned_at,
        "deviceType": scan.device_type,
        "country": scan.country,
        "city": scan.city,
        "referrer": scan.referrer,
    });
    enqueue_best_effort(&mut tx, &qr, QrWebhookEvent::ScanCreated, data, state.config.webhooks.max_attempts).await;

    if let Some(max_scans) = qr.max_scans
        && scan_limit_warning_crossed(qr.scan_count, qr.scan_count + 1, max_scans)
    {
        let used = qr.scan_count + 1;
        let title = qr.title.as_deref().unwrap_or("Untitled");
        let request = NotificationCreateDBRequest::new(
            qr.user_id,
            NotificationType::ThresholdCrossed,
            "QR code scan limit warning",
            format!("QR code \"{title}\" has used {used} of its {max_scans} scans."),
        )
        .with_link(format!("/dashboard?highlight={}", qr.id))
        .with_metadata(json!({ "qrCodeId": qr.id, "scanCount": used, "maxScans": max_scans }));
        notify(&mut tx, request).await;
    }

    let scans_this_month = usage.monthly_scan_count + 1;
    let threshold = scan_alert_threshold(plan);
    if threshold > 0 && scans_this_month >= threshold {
        let already = Notifications::new(&mut tx)
            .exists_since(qr.user_id, NotificationType::UsageAlert, month_start(now))
            .await?;
        if !already {
            let quota = plan.entitlements().monthly_scan_quota;
            let request = NotificationCreateDBRequest::new(
                qr.user_id,
                NotificationType::UsageAlert,
                "Scan quota almost used",
                format!("You have used {scans_this_month} of {quota} scans this month."),
            )
            .with_link("/dashboard/settings/billing")
            .with_metadata(json!({ "used": scans_this_month, "quota": quota }));
            notify(&mut tx, request).await;
            debug!(user_id = %abbrev_uuid(&qr.user_id), "Usage alert raised");
        }
    }

    tx.commit().await?;
    counter!("qrctl_scans_recorded_total").increment(1);
    info!(scan_id = %abbrev_uuid(&scan.id), "Scan recorded");

    Ok((
        StatusCode::OK,
        Json(ScanRecordedResponse {
            success: true,
            redirect_url: qr.redirect_url.unwrap_or(qr.url),
            scan_id: scan.id,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_app, create_test_qr_code, create_test_user};
    use axum::http::HeaderValue;
    use sqlx::PgPool;

    #[test]
    fn classifies_devices() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148";
        let ipad = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X)";
        let android_tablet = "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36";
        let android_phone = "Mozilla/5.0 (Linux; Android 13; Pixel 7) Mobile Safari/537.36";
        let bot = "Googlebot/2.1 (+http://www.google.com/bot.html)";
        let desktop = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";

        assert_eq!(device_type(Some(iphone)), "mobile");
        assert_eq!(device_type(Some(android_phone)), "mobile");
        assert_eq!(device_type(Some(ipad)), "tablet");
        assert_eq!(device_type(Some(android_tablet)), "tablet");
        assert_eq!(device_type(Some(bot)), "bot");
        assert_eq!(device_type(Some(desktop)), "desktop");
        assert_eq!(device_type(None), "desktop");
    }

    #[test]
    fn country_prefers_cloudflare_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(country(&headers), None);

        headers.insert("x-vercel-ip-country", HeaderValue::from_static("de"));
        assert_eq!(country(&headers).as_deref(), Some("DE"));

        headers.insert("cf-ipcountry", HeaderValue::from_static("IN"));
        assert_eq!(country(&headers).as_deref(), Some("IN"));

        headers.insert("cf-ipcountry", HeaderValue::from_static("XX"));
        assert_eq!(country(&headers).as_deref(), Some("DE"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_scan_recorded_when_webhook_queue_rejects(pool: PgPool) {
        let app = create_test_app(pool.clone());
        let owner = create_test_user(&pool, PlanName::Pro).await;
        let qr = create_test_qr_code(&pool, owner.id, None).await;
        let mut conn = pool.acquire().await.unwrap();
        QrCodes::new(&mut conn)
            .set_webhook(qr.id, Some("https://hooks.example.com/qr"), Some("whsec_1"))
            .await
            .unwrap();
        sqlx::query("ALTER TABLE webhook_outbox ADD CONSTRAINT reject_all CHECK (false) NOT VALID")
            .execute(&mut *conn)
            .await
            .unwrap();

        let response = app.post(&format!("/api/scan/{}", qr.id)).await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["redirectUrl"], qr.url.as_str());

        let mut repo = QrCodes::new(&mut conn);
        assert_eq!(repo.count_scans_since(qr.id, None).await.unwrap(), 1);
        assert_eq!(repo.get_by_id(qr.id).await.unwrap().unwrap().scan_count, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_scan_queues_event_for_webhook(pool: PgPool) {
        let app = create_test_app(pool.clone());
        let owner = create_test_user(&pool, PlanName::Pro).await;
        let qr = create_test_qr_code(&pool, owner.id, None).await;
        let mut conn = pool.acquire().await.unwrap();
        QrCodes::new(&mut conn)
            .set_webhook(qr.id, Some("https://hooks.example.com/qr"), Some("whsec_1"))
            .await
            .unwrap();

        app.post(&format!("/api/scan/{}", qr.id))
            .json(&json!({ "city": "Pune" }))
            .await
            .assert_status_ok();

        let queued = crate::db::handlers::WebhookOutbox::new(&mut conn).list_for_qr(qr.id, 10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].event_type, "scan.created");
        assert_eq!(queued[0].payload["data"]["city"], "Pune");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_scan_cap_warning_raised_once(pool: PgPool) {
        let app = create_test_app(pool.clone());
        let owner = create_test_user(&pool, PlanName::Free).await;
        let qr = create_test_qr_code(&pool, owner.id, None).await;
        sqlx::query("UPDATE qr_codes SET max_scans = 5, scan_count = 3 WHERE id = $1")
            .bind(qr.id)
            .execute(&pool)
            .await
            .unwrap();

        // 4 of 5 enters the warning band, 5 of 5 is the cap, the next is refused
        app.post(&format!("/api/scan/{}", qr.id)).await.assert_status_ok();
        app.post(&format!("/api/scan/{}", qr.id)).await.assert_status_ok();
        app.post(&format!("/api/scan/{}", qr.id)).await.assert_status_forbidden();

        let mut conn = pool.acquire().await.unwrap();
        let since = Utc::now() - chrono::Duration::minutes(5);
        let mut notifications = Notifications::new(&mut conn);
        assert!(notifications.exists_since(owner.id, NotificationType::ThresholdCrossed, since).await.unwrap());
        assert_eq!(notifications.unread_count(owner.id).await.unwrap(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_code_is_not_found(pool: PgPool) {
        let app = create_test_app(pool);
        app.post(&format!("/api/scan/{}", uuid::Uuid::new_v4())).await.assert_status_not_found();
    }
}
