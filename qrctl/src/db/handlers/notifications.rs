//! Database repository for in-app notifications.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::Result,
    models::notifications::{NotificationCreateDBRequest, NotificationDBResponse, NotificationFilter},
};
use crate::notifications::NotificationType;
use crate::types::{NotificationId, UserId, abbrev_uuid};

pub struct Notifications<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Notifications<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), kind = request.notification_type.as_str()), err)]
    pub async fn create(&mut self, request: &NotificationCreateDBRequest) -> Result<NotificationDBResponse> {
        let notification = sqlx::query_as::<_, NotificationDBResponse>(
            r#"
            INSERT INTO notifications (id, user_id, notification_type, title, message, link, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.notification_type.as_str())
        .bind(&request.title)
        .bind(&request.message)
        .bind(&request.link)
        .bind(&request.metadata)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(notification)
    }

    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&filter.user_id)), err)]
    pub async fn list(&mut self, filter: &NotificationFilter) -> Result<Vec<NotificationDBResponse>> {
        let notifications = sqlx::query_as::<_, NotificationDBResponse>(
            r#"
            SELECT * FROM notifications
            WHERE user_id = $1 AND (NOT $2 OR NOT is_read)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.unread_only)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(notifications)
    }

    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&filter.user_id)), err)]
    pub async fn count(&mut self, filter: &NotificationFilter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM notifications WHERE user_id = $1 AND (NOT $2 OR NOT is_read)")
            .bind(filter.user_id)
            .bind(filter.unread_only)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn unread_count(&mut self, user_id: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM notifications WHERE user_id = $1 AND NOT is_read")
            .bind(user_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    /// Only the owner's notification is touched; `false` means not found for this user
    #[instrument(skip(self), fields(notification_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_read(&mut self, id: NotificationId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn mark_all_read(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND NOT is_read")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(notification_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: NotificationId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether a notification of this type was raised for the user since `since`
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn exists_since(&mut self, user_id: UserId, kind: NotificationType, since: DateTime<Utc>) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM notifications WHERE user_id = $1 AND notification_type = $2 AND created_at >= $3)",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::PlanName;
    use crate::test_utils::create_test_user;
    use sqlx::PgPool;

    fn filter(user_id: UserId, unread_only: bool) -> NotificationFilter {
        NotificationFilter {
            user_id,
            unread_only,
            limit: 50,
            offset: 0,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_read_state_is_scoped_to_owner(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Free).await;
        let other = create_test_user(&pool, PlanName::Free).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut notifications = Notifications::new(&mut conn);

        let first = notifications
            .create(&NotificationCreateDBRequest::new(user.id, NotificationType::Info, "One", "First"))
            .await
            .unwrap();
        notifications
            .create(&NotificationCreateDBRequest::new(user.id, NotificationType::Warning, "Two", "Second"))
            .await
            .unwrap();
        assert_eq!(notifications.unread_count(user.id).await.unwrap(), 2);

        assert!(!notifications.mark_read(first.id, other.id).await.unwrap());
        assert!(!notifications.delete(first.id, other.id).await.unwrap());
        assert!(notifications.mark_read(first.id, user.id).await.unwrap());

        assert_eq!(notifications.count(&filter(user.id, true)).await.unwrap(), 1);
        assert_eq!(notifications.list(&filter(user.id, false)).await.unwrap().len(), 2);
        assert_eq!(notifications.mark_all_read(user.id).await.unwrap(), 1);
        assert_eq!(notifications.unread_count(user.id).await.unwrap(), 0);

        assert!(notifications.delete(first.id, user.id).await.unwrap());
        assert_eq!(notifications.count(&filter(user.id, false)).await.unwrap(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exists_since_matches_type_and_time(pool: PgPool) {
        let user = create_test_user(&pool, PlanName::Free).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut notifications = Notifications::new(&mut conn);
        let before = Utc::now() - chrono::Duration::minutes(1);

        assert!(!notifications.exists_since(user.id, NotificationType::UsageAlert, before).await.unwrap());
        notifications
            .create(&NotificationCreateDBRequest::new(user.id, NotificationType::UsageAlert, "Usage", "80%"))
            .await
            .unwrap();

        assert!(notifications.exists_since(user.id, NotificationType::UsageAlert, before).await.unwrap());
        assert!(!notifications.exists_since(user.id, NotificationType::CreditLow, before).await.unwrap());
        let later = Utc::now() + chrono::Duration::minutes(1);
        assert!(!notifications.exists_since(user.id, NotificationType::UsageAlert, later).await.unwrap());
    }
}
