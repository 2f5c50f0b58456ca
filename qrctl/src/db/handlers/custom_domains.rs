//! Database repository for custom domains.

use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{errors::Result, models::custom_domains::CustomDomainDBResponse};
use crate::types::{DomainId, UserId, abbrev_uuid};

pub struct CustomDomains<'c> {
    db: &'c mut PgConnection,
}

impl<'c> CustomDomains<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, verification_token), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn create(&mut self, user_id: UserId, domain: &str, verification_token: &str) -> Result<CustomDomainDBResponse> {
        let row = sqlx::query_as::<_, CustomDomainDBResponse>(
            "INSERT INTO custom_domains (id, user_id, domain, verification_token) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(domain)
        .bind(verification_token)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row)
    }

    /// Domains are unique across all users
    #[instrument(skip(self), err)]
    pub async fn get_by_domain(&mut self, domain: &str) -> Result<Option<CustomDomainDBResponse>> {
        let row = sqlx::query_as::<_, CustomDomainDBResponse>("SELECT * FROM custom_domains WHERE domain = $1")
            .bind(domain)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<CustomDomainDBResponse>> {
        let rows = sqlx::query_as::<_, CustomDomainDBResponse>(
            "SELECT * FROM custom_domains WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self), fields(domain_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_verified(&mut self, id: DomainId) -> Result<CustomDomainDBResponse> {
        let row = sqlx::query_as::<_, CustomDomainDBResponse>(
            r#"
            UPDATE custom_domains
            SET is_verified = TRUE, verified_at = NOW(), ssl_enabled = TRUE, last_checked_at = NOW(), last_error = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self, error), fields(domain_id = %abbrev_uuid(&id)), err)]
    pub async fn record_check_failure(&mut self, id: DomainId, error: &str) -> Result<()> {
        sqlx::query("UPDATE custom_domains SET last_checked_at = NOW(), last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn delete_for_user(&mut self, user_id: UserId, domain: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM custom_domains WHERE user_id = $1 AND domain = $2")
            .bind(user_id)
            .bind(domain)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use crate::entitlements::PlanName;
    use crate::test_utils::create_test_user;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_domain_claimed_by_one_user(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Pro).await;
        let other = create_test_user(&pool, PlanName::Pro).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut domains = CustomDomains::new(&mut conn);

        let created = domains.create(user.id, "qr.acme.example", "token-1").await.unwrap();
        assert!(!created.is_verified);
        let taken = domains.create(other.id, "qr.acme.example", "token-2").await;
        assert!(matches!(taken, Err(DbError::UniqueViolation { .. })));

        assert!(!domains.delete_for_user(other.id, "qr.acme.example").await.unwrap());
        assert!(domains.delete_for_user(user.id, "qr.acme.example").await.unwrap());
        assert!(domains.get_by_domain("qr.acme.example").await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_verification_clears_last_error(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Pro).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut domains = CustomDomains::new(&mut conn);
        let created = domains.create(user.id, "qr.acme.example", "token-1").await.unwrap();

        domains.record_check_failure(created.id, "TXT record not found").await.unwrap();
        let failed = domains.get_by_domain("qr.acme.example").await.unwrap().unwrap();
        assert_eq!(failed.last_error.as_deref(), Some("TXT record not found"));
        assert!(failed.last_checked_at.is_some());

        let verified = domains.mark_verified(created.id).await.unwrap();
        assert!(verified.is_verified && verified.ssl_enabled);
        assert_eq!(verified.last_error, None);
        assert_eq!(domains.list_for_user(user.id).await.unwrap().len(), 1);
    }
}
