//! Database repository for users.

use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::users::{UserCounts, UserCreateDBRequest, UserDBResponse, UserFilter, UserUpdateDBRequest},
};
use crate::entitlements::PlanName;
use crate::types::{UserId, abbrev_uuid};

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

/// `%term%` for ILIKE, with LIKE wildcards in the term escaped
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term.trim().replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (id, email, display_name, password_hash, auth_source)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.email.trim())
        .bind(&request.display_name)
        .bind(&request.password_hash)
        .bind(&request.auth_source)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let users = sqlx::query_as::<_, UserDBResponse>(
            r#"
            SELECT * FROM users
            WHERE ($1::text IS NULL OR email ILIKE $1 OR display_name ILIKE $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.search.as_deref().map(like_pattern))
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(users)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            UPDATE users SET
                display_name = COALESCE($2, display_name),
                plan = COALESCE($3, plan),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.display_name)
        .bind(request.plan.map(|p| p.as_str()))
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(user)
    }
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Case-insensitive lookup
    #[instrument(skip(self), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email.trim())
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &UserFilter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM users WHERE ($1::text IS NULL OR email ILIKE $1 OR display_name ILIKE $1)",
        )
        .bind(filter.search.as_deref().map(like_pattern))
        .fetch_one(&mut *self.db)
        .await?;
        Ok(count)
    }

    #[instrument(skip(self), err)]
    pub async fn counts(&mut self) -> Result<UserCounts> {
        let counts = sqlx::query_as::<_, UserCounts>(
            r#"
            SELECT
                COUNT(*)::BIGINT AS total,
                COUNT(*) FILTER (WHERE NOT is_locked)::BIGINT AS active,
                COUNT(*) FILTER (WHERE is_locked)::BIGINT AS locked
            FROM users
            "#,
        )
        .fetch_one(&mut *self.db)
        .await?;
        Ok(counts)
    }

    #[instrument(skip(self, reason), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn set_locked(&mut self, id: UserId, locked: bool, reason: Option<&str>) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            UPDATE users SET
                is_locked = $2,
                lock_reason = CASE WHEN $2 THEN $3 ELSE NULL END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(locked)
        .bind(reason)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id), plan = %plan), err)]
    pub async fn set_plan(&mut self, id: UserId, plan: PlanName) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET plan = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(plan.as_str())
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Adds credits and returns the new balance
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn add_credits(&mut self, id: UserId, amount: i32) -> Result<Option<i32>> {
        let balance: Option<i32> =
            sqlx::query_scalar("UPDATE users SET credits = credits + $2, updated_at = NOW() WHERE id = $1 RETURNING credits")
                .bind(id)
                .bind(amount)
                .fetch_optional(&mut *self.db)
                .await?;
        Ok(balance)
    }

    /// Atomically spends `cost` credits. Returns the remaining balance, or `None`
    /// when the balance was too low (nothing is deducted).
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn consume_credits(&mut self, id: UserId, cost: i32) -> Result<Option<i32>> {
        let balance: Option<i32> = sqlx::query_scalar(
            "UPDATE users SET credits = credits - $2, updated_at = NOW() WHERE id = $1 AND credits >= $2 RETURNING credits",
        )
        .bind(id)
        .bind(cost)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_user;
    use sqlx::PgPool;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("acme"), "%acme%");
        assert_eq!(like_pattern(" 50%_off "), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_consume_credits_never_overdraws(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Flex).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);

        assert_eq!(users.add_credits(user.id, 5).await.unwrap(), Some(5));
        assert_eq!(users.consume_credits(user.id, 3).await.unwrap(), Some(2));
        assert_eq!(users.consume_credits(user.id, 3).await.unwrap(), None);
        assert_eq!(users.consume_credits(user.id, 2).await.unwrap(), Some(0));

        let reloaded = users.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.credits, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_consumers_share_one_balance(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Flex).await;
        Users::new(&mut pool.acquire().await.unwrap()).add_credits(user.id, 4).await.unwrap();

        let user_id = user.id;
        let spend = move |pool: PgPool| async move {
            let mut conn = pool.acquire().await.unwrap();
            Users::new(&mut conn).consume_credits(user_id, 3).await.unwrap()
        };
        let (a, b) = tokio::join!(spend(pool.clone()), spend(pool.clone()));

        assert_eq!([a, b].iter().filter(|r| r.is_some()).count(), 1);
        let balance = Users::new(&mut pool.acquire().await.unwrap()).get_by_id(user.id).await.unwrap().unwrap().credits;
        assert_eq!(balance, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_email_lookup_ignores_case(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Free).await;
        let mut conn = pool.acquire().await.unwrap();
        let found = Users::new(&mut conn).get_user_by_email(&user.email.to_uppercase()).await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_lock_reason_cleared_on_unlock(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Free).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);

        let locked = users.set_locked(user.id, true, Some("chargeback")).await.unwrap().unwrap();
        assert!(locked.is_locked);
        assert_eq!(locked.lock_reason.as_deref(), Some("chargeback"));
        assert_eq!(users.counts().await.unwrap().locked, 1);

        let unlocked = users.set_locked(user.id, false, Some("ignored")).await.unwrap().unwrap();
        assert!(!unlocked.is_locked);
        assert_eq!(unlocked.lock_reason, None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_plan_update_round_trips(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Free).await;
        assert_eq!(user.plan_name(), PlanName::Free);

        let mut conn = pool.acquire().await.unwrap();
        let updated = Users::new(&mut conn)
            .update(
                user.id,
                &UserUpdateDBRequest {
                    display_name: None,
                    plan: Some(PlanName::Business),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.plan_name(), PlanName::Business);
        assert_eq!(updated.display_name.as_deref(), Some("Test User"));
    }
}
