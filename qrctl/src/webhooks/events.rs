//! Per-QR-code webhook events and their outbox payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgConnection};
use utoipa::ToSchema;

use crate::db::{
    errors::Result as DbResult,
    handlers::WebhookOutbox,
    models::{qr_codes::QrCodeDBResponse, webhook_outbox::OutboxCreateDBRequest},
};
use crate::types::{OutboxId, QrCodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum QrWebhookEvent {
    #[serde(rename = "scan.created")]
    ScanCreated,
    #[serde(rename = "qr.updated")]
    QrUpdated,
    #[serde(rename = "qr.deleted")]
    QrDeleted,
}

impl QrWebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScanCreated => "scan.created",
            Self::QrUpdated => "qr.updated",
            Self::QrDeleted => "qr.deleted",
        }
    }
}

impl std::fmt::Display for QrWebhookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QrWebhookEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan.created" => Ok(Self::ScanCreated),
            "qr.updated" => Ok(Self::QrUpdated),
            "qr.deleted" => Ok(Self::QrDeleted),
            _ => Err(format!("Unknown event type: {s}")),
        }
    }
}

/// Body delivered to the subscriber
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: QrWebhookEvent,
    #[schema(value_type = String, format = "uuid")]
    pub qr_code_id: QrCodeId,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookPayload {
    pub fn new(event: QrWebhookEvent, qr_code_id: QrCodeId, data: serde_json::Value) -> Self {
        Self {
            event,
            qr_code_id,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Queue an event for a QR code. QR codes without a webhook URL get nothing.
pub async fn enqueue(
    conn: &mut PgConnection,
    qr: &QrCodeDBResponse,
    event: QrWebhookEvent,
    data: serde_json::Value,
    max_attempts: i32,
) -> DbResult<Option<OutboxId>> {
    let Some(webhook_url) = qr.webhook_url.as_deref().filter(|u| !u.is_empty()) else {
        return Ok(None);
    };

    let payload = WebhookPayload::new(event, qr.id, data);
    let request = OutboxCreateDBRequest {
        qr_code_id: qr.id,
        event_type: event.as_str().to_string(),
        payload: serde_json::to_value(&payload).map_err(anyhow::Error::from)?,
        webhook_url: webhook_url.to_string(),
        webhook_secret: qr.webhook_secret.clone(),
        max_attempts,
    };

    let id = WebhookOutbox::new(conn).enqueue(&request).await?;
    tracing::debug!(event = %event, outbox_id = %id, "Webhook event queued");
    Ok(Some(id))
}

/// Like [`enqueue`], but a failure is logged rather than returned.
///
/// The insert runs under a savepoint, so a failed enqueue leaves the caller's
/// transaction usable and the rest of its work still commits.
pub async fn enqueue_best_effort(
    conn: &mut PgConnection,
    qr: &QrCodeDBResponse,
    event: QrWebhookEvent,
    data: serde_json::Value,
    max_attempts: i32,
) {
    let mut savepoint = match conn.begin().await {
        Ok(sp) => sp,
        Err(e) => {
            tracing::warn!(qr_code_id = %qr.id, event = %event, error = %e, "Failed to open savepoint for webhook event");
            return;
        }
    };

    match enqueue(&mut savepoint, qr, event, data, max_attempts).await {
        Ok(_) => {
            if let Err(e) = savepoint.commit().await {
                tracing::warn!(qr_code_id = %qr.id, event = %event, error = %e, "Failed to release webhook savepoint");
            }
        }
        Err(e) => {
            tracing::warn!(qr_code_id = %qr.id, event = %event, error = %e, "Failed to queue webhook event");
            if let Err(e) = savepoint.rollback().await {
                tracing::warn!(qr_code_id = %qr.id, error = %e, "Failed to roll back webhook savepoint");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn event_names() {
        for event in [QrWebhookEvent::ScanCreated, QrWebhookEvent::QrUpdated, QrWebhookEvent::QrDeleted] {
            assert_eq!(event.as_str().parse::<QrWebhookEvent>().unwrap(), event);
            assert_eq!(serde_json::to_value(event).unwrap(), event.as_str());
        }
        assert!("scan_created".parse::<QrWebhookEvent>().is_err());
    }

    #[test]
    fn payload_uses_camel_case_keys() {
        let id = Uuid::new_v4();
        let payload = WebhookPayload::new(QrWebhookEvent::ScanCreated, id, json!({"scanId": "s1"}));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["event"], "scan.created");
        assert_eq!(value["qrCodeId"], id.to_string());
        assert_eq!(value["data"]["scanId"], "s1");
        assert!(value["timestamp"].is_string());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_failed_enqueue_keeps_callers_work(pool: sqlx::PgPool) {
        use crate::db::{handlers::QrCodes, models::qr_codes::ScanCreateDBRequest};
        use crate::test_utils::{create_test_qr_code, create_test_user};

        let user = create_test_user(&pool, crate::entitlements::PlanName::Pro).await;
        let qr = create_test_qr_code(&pool, user.id, None).await;
        let mut conn = pool.acquire().await.unwrap();
        let qr = QrCodes::new(&mut conn)
            .set_webhook(qr.id, Some("https://hooks.example.com/qr"), Some("whsec_1"))
            .await
            .unwrap()
            .unwrap();
        sqlx::query("ALTER TABLE webhook_outbox ADD CONSTRAINT reject_all CHECK (false) NOT VALID")
            .execute(&mut *conn)
            .await
            .unwrap();

        let scan = ScanCreateDBRequest {
            qr_code_id: qr.id,
            ip_address: None,
            user_agent: None,
            device_type: "desktop".to_string(),
            country: None,
            city: None,
            referrer: None,
        };
        let mut tx = pool.begin().await.unwrap();
        QrCodes::new(&mut tx).insert_scan(&scan).await.unwrap();
        enqueue_best_effort(&mut tx, &qr, QrWebhookEvent::ScanCreated, json!({}), 3).await;
        QrCodes::new(&mut tx).insert_scan(&scan).await.unwrap();
        tx.commit().await.unwrap();

        let mut repo = QrCodes::new(&mut conn);
        assert_eq!(repo.count_scans_since(qr.id, None).await.unwrap(), 2);
        let outbox = WebhookOutbox::new(&mut conn).counts_for_qr(qr.id).await.unwrap();
        assert_eq!(outbox.total, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_enqueue_skips_codes_without_webhook(pool: sqlx::PgPool) {
        use crate::test_utils::{create_test_qr_code, create_test_user};

        let user = create_test_user(&pool, crate::entitlements::PlanName::Pro).await;
        let qr = create_test_qr_code(&pool, user.id, None).await;
        let mut conn = pool.acquire().await.unwrap();

        assert_eq!(enqueue(&mut conn, &qr, QrWebhookEvent::QrUpdated, json!({}), 3).await.unwrap(), None);

        let with_hook = QrCodeDBResponse {
            webhook_url: Some("https://hooks.example.com/qr".to_string()),
            ..qr
        };
        let id = enqueue(&mut conn, &with_hook, QrWebhookEvent::QrUpdated, json!({"title": "x"}), 3)
            .await
            .unwrap()
            .unwrap();
        let row = WebhookOutbox::new(&mut conn).list_for_qr(with_hook.id, 1).await.unwrap().remove(0);
        assert_eq!(row.id, id);
        assert_eq!(row.event_type, "qr.updated");
        assert_eq!(row.max_attempts, 3);
    }
}
