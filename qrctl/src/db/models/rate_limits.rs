//! Database model for fixed rate-limit windows.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct RateLimitWindow {
    pub key: String,
    pub route: String,
    pub window_start: DateTime<Utc>,
    pub count: i32,
}
