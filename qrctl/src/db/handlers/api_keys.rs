//! Database repository for developer API keys.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::Result,
    models::api_keys::{ApiKeyCreateDBRequest, ApiKeyDBResponse},
};
use crate::types::{ApiKeyId, UserId, abbrev_uuid};

pub struct ApiKeys<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ApiKeys<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    pub async fn create(&mut self, request: &ApiKeyCreateDBRequest) -> Result<ApiKeyDBResponse> {
        let key = sqlx::query_as::<_, ApiKeyDBResponse>(
            r#"
            INSERT INTO api_keys (id, name, key_hash, key_prefix, scopes, user_id, organization_id, expires_at, rotated_from_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.name)
        .bind(&request.key_hash)
        .bind(&request.key_prefix)
        .bind(&request.scopes)
        .bind(request.user_id)
        .bind(request.organization_id)
        .bind(request.expires_at)
        .bind(request.rotated_from_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(key)
    }

    #[instrument(skip(self), fields(api_key_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: ApiKeyId) -> Result<Option<ApiKeyDBResponse>> {
        let key = sqlx::query_as::<_, ApiKeyDBResponse>("SELECT * FROM api_keys WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(key)
    }

    #[instrument(skip(self, key_hash), err)]
    pub async fn get_by_hash(&mut self, key_hash: &str) -> Result<Option<ApiKeyDBResponse>> {
        let key = sqlx::query_as::<_, ApiKeyDBResponse>("SELECT * FROM api_keys WHERE key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(key)
    }

    /// The user's own keys plus keys of organizations they own or administer
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_manageable(&mut self, user_id: UserId) -> Result<Vec<ApiKeyDBResponse>> {
        let keys = sqlx::query_as::<_, ApiKeyDBResponse>(
            r#"
            SELECT * FROM api_keys
            WHERE user_id = $1
               OR organization_id IN (
                    SELECT organization_id FROM organization_members
                    WHERE user_id = $1 AND role IN ('owner', 'admin')
               )
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(keys)
    }

    #[instrument(skip(self), fields(api_key_id = %abbrev_uuid(&id)), err)]
    pub async fn deactivate(&mut self, id: ApiKeyId) -> Result<bool> {
        let result = sqlx::query("UPDATE api_keys SET is_active = FALSE WHERE id = $1 AND is_active")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(api_key_id = %abbrev_uuid(&id)), err)]
    pub async fn touch_last_used(&mut self, id: ApiKeyId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }
}
