//! Database repository for per-request API usage logs.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::Result,
    models::api_keys::{ApiUsageLogCreateDBRequest, ApiUsageStats},
};
use crate::types::{ApiKeyId, abbrev_uuid};

pub struct ApiUsage<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ApiUsage<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(api_key_id = %abbrev_uuid(&request.api_key_id), endpoint = %request.endpoint), err)]
    pub async fn record(&mut self, request: &ApiUsageLogCreateDBRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_usage_logs (
                id, api_key_id, user_id, organization_id, endpoint, method, status_code,
                request_size, response_size, response_time_ms, ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.api_key_id)
        .bind(request.user_id)
        .bind(request.organization_id)
        .bind(&request.endpoint)
        .bind(&request.method)
        .bind(request.status_code)
        .bind(request.request_size)
        .bind(request.response_size)
        .bind(request.response_time_ms)
        .bind(&request.ip_address)
        .bind(&request.user_agent)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    /// Aggregate usage for one key, optionally bounded to `[from, to]`
    #[instrument(skip(self), fields(api_key_id = %abbrev_uuid(&api_key_id)), err)]
    pub async fn stats(
        &mut self,
        api_key_id: ApiKeyId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<ApiUsageStats> {
        let stats = sqlx::query_as::<_, ApiUsageStats>(
            r#"
            SELECT
                COUNT(*)::BIGINT AS request_count,
                COUNT(*) FILTER (WHERE status_code >= 400)::BIGINT AS error_count,
                AVG(response_time_ms)::FLOAT8 AS avg_response_time_ms,
                SUM(request_size)::BIGINT AS total_request_size,
                SUM(response_size)::BIGINT AS total_response_size
            FROM api_usage_logs
            WHERE api_key_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at <= $3)
            "#,
        )
        .bind(api_key_id)
        .bind(from)
        .bind(to)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(stats)
    }
}
