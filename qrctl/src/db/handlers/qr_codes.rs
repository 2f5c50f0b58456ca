//! Database repository for QR codes, their scans and scan analytics.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::{DbError, Result},
    handlers::{repository::Repository, users::like_pattern},
    models::qr_codes::{
        DailyScanCount, QrCodeCreateDBRequest, QrCodeDBResponse, QrCodeFilter, QrCodeOwner, QrCodeUpdateDBRequest, ScanBucket,
        ScanCreateDBRequest, ScanDBResponse,
    },
};
use crate::entitlements::{UsageSnapshot, month_start};
use crate::types::{OrganizationId, QrCodeId, UserId, abbrev_uuid};

pub struct QrCodes<'c> {
    db: &'c mut PgConnection,
}

fn owner_binds(owner: QrCodeOwner) -> (Option<UserId>, Option<OrganizationId>) {
    match owner {
        QrCodeOwner::User(id) => (Some(id), None),
        QrCodeOwner::OrganizationMembers(id) => (None, Some(id)),
    }
}

const OWNER_AND_SEARCH: &str = r#"
    ($1::uuid IS NULL OR user_id = $1)
    AND ($2::uuid IS NULL OR user_id IN (SELECT user_id FROM organization_members WHERE organization_id = $2))
    AND ($3::text IS NULL OR title ILIKE $3 OR description ILIKE $3 OR url ILIKE $3)
"#;

#[async_trait::async_trait]
impl<'c> Repository for QrCodes<'c> {
    type CreateRequest = QrCodeCreateDBRequest;
    type UpdateRequest = QrCodeUpdateDBRequest;
    type Response = QrCodeDBResponse;
    type Id = QrCodeId;
    type Filter = QrCodeFilter;

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let qr = sqlx::query_as::<_, QrCodeDBResponse>(
            r#"
            INSERT INTO qr_codes (
                id, user_id, organization_id, url, title, description, template,
                foreground_color, background_color, dot_type, corner_type, logo_url,
                has_watermark, is_dynamic, style, redirect_url, expires_at, max_scans, credit_cost
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.organization_id)
        .bind(&request.url)
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.template)
        .bind(&request.foreground_color)
        .bind(&request.background_color)
        .bind(&request.dot_type)
        .bind(&request.corner_type)
        .bind(&request.logo_url)
        .bind(request.has_watermark)
        .bind(request.is_dynamic)
        .bind(&request.style)
        .bind(&request.redirect_url)
        .bind(request.expires_at)
        .bind(request.max_scans)
        .bind(request.credit_cost)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(qr)
    }

    #[instrument(skip(self), fields(qr_code_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let qr = sqlx::query_as::<_, QrCodeDBResponse>("SELECT * FROM qr_codes WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(qr)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, offset = filter.offset), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let (user_id, org_id) = owner_binds(filter.owner);
        let sql = format!("SELECT * FROM qr_codes WHERE {OWNER_AND_SEARCH} ORDER BY created_at DESC LIMIT $4 OFFSET $5");
        let codes = sqlx::query_as::<_, QrCodeDBResponse>(&sql)
            .bind(user_id)
            .bind(org_id)
            .bind(filter.search.as_deref().map(like_pattern))
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(codes)
    }

    #[instrument(skip(self), fields(qr_code_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM qr_codes WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(qr_code_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let qr = sqlx::query_as::<_, QrCodeDBResponse>(
            r#"
            UPDATE qr_codes SET
                url = COALESCE($2, url),
                title = COALESCE($3, title),
                description = COALESCE($4, description),
                foreground_color = COALESCE($5, foreground_color),
                background_color = COALESCE($6, background_color),
                dot_type = COALESCE($7, dot_type),
                corner_type = COALESCE($8, corner_type),
                logo_url = COALESCE($9, logo_url),
                has_watermark = COALESCE($10, has_watermark),
                is_dynamic = COALESCE($11, is_dynamic),
                expires_at = COALESCE($12, expires_at),
                max_scans = COALESCE($13, max_scans),
                redirect_url = COALESCE($14, redirect_url),
                is_active = COALESCE($15, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.url)
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.foreground_color)
        .bind(&request.background_color)
        .bind(&request.dot_type)
        .bind(&request.corner_type)
        .bind(&request.logo_url)
        .bind(request.has_watermark)
        .bind(request.is_dynamic)
        .bind(request.expires_at)
        .bind(request.max_scans)
        .bind(&request.redirect_url)
        .bind(request.is_active)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(qr)
    }
}

impl<'c> QrCodes<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &QrCodeFilter) -> Result<i64> {
        let (user_id, org_id) = owner_binds(filter.owner);
        let sql = format!("SELECT COUNT(*)::BIGINT FROM qr_codes WHERE {OWNER_AND_SEARCH}");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(user_id)
            .bind(org_id)
            .bind(filter.search.as_deref().map(like_pattern))
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    /// QR codes owned by the user, and scans of them since the start of `now`'s UTC month
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn usage_snapshot(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<UsageSnapshot> {
        let (qr_codes_count, monthly_scan_count): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM qr_codes WHERE user_id = $1)::BIGINT,
                (SELECT COUNT(*) FROM scans s JOIN qr_codes q ON q.id = s.qr_code_id
                 WHERE q.user_id = $1 AND s.scanned_at >= $2)::BIGINT
            "#,
        )
        .bind(user_id)
        .bind(month_start(now))
        .fetch_one(&mut *self.db)
        .await?;

        Ok(UsageSnapshot {
            user_id,
            qr_codes_count,
            monthly_scan_count,
        })
    }

    /// Set or clear the outgoing webhook. Clearing also drops the secret.
    #[instrument(skip(self, url, secret), fields(qr_code_id = %abbrev_uuid(&id)), err)]
    pub async fn set_webhook(&mut self, id: QrCodeId, url: Option<&str>, secret: Option<&str>) -> Result<Option<QrCodeDBResponse>> {
        let qr = sqlx::query_as::<_, QrCodeDBResponse>(
            "UPDATE qr_codes SET webhook_url = $2, webhook_secret = $3, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(url)
        .bind(secret)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(qr)
    }

    /// Row-locks the QR code for the duration of the caller's transaction
    #[instrument(skip(self), fields(qr_code_id = %abbrev_uuid(&id)), err)]
    pub async fn get_for_update(&mut self, id: QrCodeId) -> Result<Option<QrCodeDBResponse>> {
        let qr = sqlx::query_as::<_, QrCodeDBResponse>("SELECT * FROM qr_codes WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(qr)
    }

    #[instrument(skip(self, request), fields(qr_code_id = %abbrev_uuid(&request.qr_code_id)), err)]
    pub async fn insert_scan(&mut self, request: &ScanCreateDBRequest) -> Result<ScanDBResponse> {
        let scan = sqlx::query_as::<_, ScanDBResponse>(
            r#"
            INSERT INTO scans (id, qr_code_id, ip_address, user_agent, device_type, country, city, referrer)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.qr_code_id)
        .bind(&request.ip_address)
        .bind(&request.user_agent)
        .bind(&request.device_type)
        .bind(&request.country)
        .bind(&request.city)
        .bind(&request.referrer)
        .fetch_one(&mut *self.db)
        .await?;

        sqlx::query("UPDATE qr_codes SET scan_count = scan_count + 1, last_scanned_at = $2 WHERE id = $1")
            .bind(request.qr_code_id)
            .bind(scan.scanned_at)
            .execute(&mut *self.db)
            .await?;

        Ok(scan)
    }

    /// Every QR code a user owns, for credit accounting
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_all_for_user(&mut self, user_id: UserId) -> Result<Vec<QrCodeDBResponse>> {
        let codes = sqlx::query_as::<_, QrCodeDBResponse>("SELECT * FROM qr_codes WHERE user_id = $1 ORDER BY created_at")
            .bind(user_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(codes)
    }

    #[instrument(skip(self), fields(qr_code_id = %abbrev_uuid(&id)), err)]
    pub async fn list_scans(&mut self, id: QrCodeId, limit: i64, offset: i64) -> Result<Vec<ScanDBResponse>> {
        let scans = sqlx::query_as::<_, ScanDBResponse>(
            "SELECT * FROM scans WHERE qr_code_id = $1 ORDER BY scanned_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(scans)
    }

    #[instrument(skip(self), fields(qr_code_id = %abbrev_uuid(&id)), err)]
    pub async fn count_scans_since(&mut self, id: QrCodeId, since: Option<DateTime<Utc>>) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM scans WHERE qr_code_id = $1 AND ($2::timestamptz IS NULL OR scanned_at >= $2)")
                .bind(id)
                .bind(since)
                .fetch_one(&mut *self.db)
                .await?;
        Ok(count)
    }

    #[instrument(skip(self), fields(qr_code_id = %abbrev_uuid(&id)), err)]
    pub async fn daily_scans(&mut self, id: QrCodeId, since: DateTime<Utc>) -> Result<Vec<DailyScanCount>> {
        let rows = sqlx::query_as::<_, DailyScanCount>(
            r#"
            SELECT (scanned_at AT TIME ZONE 'UTC')::date AS day, COUNT(*)::BIGINT AS count
            FROM scans
            WHERE qr_code_id = $1 AND scanned_at >= $2
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(id)
        .bind(since)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self), fields(qr_code_id = %abbrev_uuid(&id)), err)]
    pub async fn device_breakdown(&mut self, id: QrCodeId, since: DateTime<Utc>) -> Result<Vec<ScanBucket>> {
        let rows = sqlx::query_as::<_, ScanBucket>(
            r#"
            SELECT COALESCE(device_type, 'unknown') AS label, COUNT(*)::BIGINT AS count
            FROM scans
            WHERE qr_code_id = $1 AND scanned_at >= $2
            GROUP BY label
            ORDER BY count DESC
            "#,
        )
        .bind(id)
        .bind(since)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self), fields(qr_code_id = %abbrev_uuid(&id)), err)]
    pub async fn top_countries(&mut self, id: QrCodeId, since: DateTime<Utc>, limit: i64) -> Result<Vec<ScanBucket>> {
        let rows = sqlx::query_as::<_, ScanBucket>(
            r#"
            SELECT COALESCE(country, 'unknown') AS label, COUNT(*)::BIGINT AS count
            FROM scans
            WHERE qr_code_id = $1 AND scanned_at >= $2
            GROUP BY label
            ORDER BY count DESC
            LIMIT $3
            "#,
        )
        .bind(id)
        .bind(since)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }
}
