//! Database repository for fixed-window rate limit counters.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{errors::Result, models::rate_limits::RateLimitWindow};

pub struct RateLimits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> RateLimits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Locks the window row for `(key, route)`, creating an empty one if missing.
    /// Must run inside a transaction.
    #[instrument(skip(self), err)]
    pub async fn lock_window(&mut self, key: &str, route: &str, now: DateTime<Utc>) -> Result<RateLimitWindow> {
        sqlx::query("INSERT INTO rate_limits (key, route, window_start, count) VALUES ($1, $2, $3, 0) ON CONFLICT DO NOTHING")
            .bind(key)
            .bind(route)
            .bind(now)
            .execute(&mut *self.db)
            .await?;

        let window = sqlx::query_as::<_, RateLimitWindow>("SELECT * FROM rate_limits WHERE key = $1 AND route = $2 FOR UPDATE")
            .bind(key)
            .bind(route)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(window)
    }

    #[instrument(skip(self), err)]
    pub async fn save_window(&mut self, key: &str, route: &str, window_start: DateTime<Utc>, count: i32) -> Result<()> {
        sqlx::query("UPDATE rate_limits SET window_start = $3, count = $4 WHERE key = $1 AND route = $2")
            .bind(key)
            .bind(route)
            .bind(window_start)
            .bind(count)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// Deletes windows that started before `cutoff`
    #[instrument(skip(self), err)]
    pub async fn sweep(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE window_start < $1")
            .bind(cutoff)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
