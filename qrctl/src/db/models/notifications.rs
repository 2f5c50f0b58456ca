//! Database models for in-app notifications.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

use crate::notifications::NotificationType;
use crate::types::{NotificationId, UserId};

#[derive(Debug, Clone, FromRow)]
pub struct NotificationDBResponse {
    pub id: NotificationId,
    pub user_id: UserId,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NotificationCreateDBRequest {
    pub user_id: UserId,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct NotificationFilter {
    pub user_id: UserId,
    pub unread_only: bool,
    pub limit: i64,
    pub offset: i64,
}
