//! Database repository for the outgoing webhook outbox.
//!
//! Rows move `pending → processing → delivered | pending (retry) | failed`. Claims
//! use `FOR UPDATE SKIP LOCKED` so several replicas can drain the same table.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::Result,
    models::webhook_outbox::{ClaimedDelivery, OutboxCounts, OutboxCreateDBRequest, OutboxDBResponse, OutboxStatus},
};
use crate::types::{OutboxId, QrCodeId, abbrev_uuid};

/// Response bodies are stored truncated to this many bytes
pub const MAX_STORED_BODY_BYTES: usize = 1024;

pub struct WebhookOutbox<'c> {
    db: &'c mut PgConnection,
}

/// Outcome of [`WebhookOutbox::release_stale`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleRelease {
    pub released: u64,
    pub failed: u64,
}

/// Cut `body` to at most [`MAX_STORED_BODY_BYTES`] on a char boundary
pub fn truncate_body(body: &str) -> &str {
    if body.len() <= MAX_STORED_BODY_BYTES {
        return body;
    }
    let mut end = MAX_STORED_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

impl<'c> WebhookOutbox<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(qr_code_id = %abbrev_uuid(&request.qr_code_id), event = %request.event_type), err)]
    pub async fn enqueue(&mut self, request: &OutboxCreateDBRequest) -> Result<OutboxId> {
        let id: OutboxId = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_outbox
                (id, qr_code_id, event_type, payload, webhook_url, webhook_secret, status, attempts, max_attempts, next_retry_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7, NOW())
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.qr_code_id)
        .bind(&request.event_type)
        .bind(&request.payload)
        .bind(&request.webhook_url)
        .bind(&request.webhook_secret)
        .bind(request.max_attempts)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(id)
    }

    /// Claim due rows, marking them processing and counting the attempt
    #[instrument(skip(self), err)]
    pub async fn claim_due(&mut self, limit: i64, now: DateTime<Utc>) -> Result<Vec<ClaimedDelivery>> {
        let claimed = sqlx::query_as::<_, ClaimedDelivery>(
            r#"
            WITH due AS (
                SELECT id FROM webhook_outbox
                WHERE status = 'pending' AND next_retry_at <= $2 AND attempts < max_attempts
                ORDER BY next_retry_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE webhook_outbox o
            SET status = 'processing', attempts = o.attempts + 1, last_attempt_at = $2
            FROM due
            WHERE o.id = due.id
            RETURNING o.id, o.qr_code_id, o.event_type, o.payload, o.webhook_url, o.attempts, o.max_attempts, o.webhook_secret
            "#,
        )
        .bind(limit)
        .bind(now)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(claimed)
    }

    #[instrument(skip(self, body), fields(outbox_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_delivered(&mut self, id: OutboxId, response_status: i32, body: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_outbox
            SET status = 'delivered', response_status = $2, response_body = $3, last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(response_status)
        .bind(truncate_body(body))
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    /// Put the row back to pending, due again at `next_retry_at`
    #[instrument(skip(self, error), fields(outbox_id = %abbrev_uuid(&id)), err)]
    pub async fn schedule_retry(
        &mut self,
        id: OutboxId,
        next_retry_at: DateTime<Utc>,
        response_status: Option<i32>,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_outbox
            SET status = 'pending', next_retry_at = $2, response_status = $3, last_error = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_retry_at)
        .bind(response_status)
        .bind(error)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, error), fields(outbox_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_failed(&mut self, id: OutboxId, response_status: Option<i32>, error: &str) -> Result<()> {
        sqlx::query("UPDATE webhook_outbox SET status = 'failed', response_status = $2, last_error = $3 WHERE id = $1")
            .bind(id)
            .bind(response_status)
            .bind(error)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// Settle rows stuck in processing since before `cutoff`, e.g. after a crash mid-send.
    /// Rows with attempts left go back to pending; rows on their final attempt fail.
    #[instrument(skip(self), err)]
    pub async fn release_stale(&mut self, cutoff: DateTime<Utc>) -> Result<StaleRelease> {
        let statuses: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE webhook_outbox SET
                status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                next_retry_at = NOW(),
                last_error = CASE
                    WHEN attempts >= max_attempts THEN COALESCE(last_error, 'no result recorded for final attempt')
                    ELSE last_error
                END
            WHERE status = 'processing' AND last_attempt_at < $1
            RETURNING status
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *self.db)
        .await?;

        let failed = statuses.iter().filter(|s| s.as_str() == "failed").count() as u64;
        Ok(StaleRelease {
            released: statuses.len() as u64 - failed,
            failed,
        })
    }

    #[instrument(skip(self), fields(qr_code_id = %abbrev_uuid(&qr_code_id)), err)]
    pub async fn counts_for_qr(&mut self, qr_code_id: QrCodeId) -> Result<OutboxCounts> {
        let counts = sqlx::query_as::<_, OutboxCounts>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending')::BIGINT AS pending,
                COUNT(*) FILTER (WHERE status = 'processing')::BIGINT AS processing,
                COUNT(*) FILTER (WHERE status = 'delivered')::BIGINT AS delivered,
                COUNT(*) FILTER (WHERE status = 'failed')::BIGINT AS failed,
                COUNT(*)::BIGINT AS total
            FROM webhook_outbox
            WHERE qr_code_id = $1
            "#,
        )
        .bind(qr_code_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(counts)
    }

    #[instrument(skip(self), fields(qr_code_id = %abbrev_uuid(&qr_code_id)), err)]
    pub async fn list_for_qr(&mut self, qr_code_id: QrCodeId, limit: i64) -> Result<Vec<OutboxDBResponse>> {
        let rows = sqlx::query_as::<_, OutboxDBResponse>(
            "SELECT * FROM webhook_outbox WHERE qr_code_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(qr_code_id)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self), err)]
    pub async fn count_with_status(&mut self, status: OutboxStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM webhook_outbox WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }
}
