//! In-app notifications.
//!
//! Notifications are raised as side effects of other operations: payments, scan
//! quotas, low credit balances, per-code scan caps and domain verification.
//! Raising one never fails the operation that triggered it; [`notify`] logs and
//! swallows database errors.

use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgConnection};
use utoipa::ToSchema;

use crate::db::handlers::Notifications;
use crate::db::models::notifications::NotificationCreateDBRequest;
use crate::types::{NotificationId, UserId, abbrev_uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Info,
    Warning,
    Error,
    Success,
    UsageAlert,
    CreditLow,
    DomainVerified,
    ThresholdCrossed,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
            Self::UsageAlert => "usage_alert",
            Self::CreditLow => "credit_low",
            Self::DomainVerified => "domain_verified",
            Self::ThresholdCrossed => "threshold_crossed",
        }
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "success" => Ok(Self::Success),
            "usage_alert" => Ok(Self::UsageAlert),
            "credit_low" => Ok(Self::CreditLow),
            "domain_verified" => Ok(Self::DomainVerified),
            "threshold_crossed" => Ok(Self::ThresholdCrossed),
            _ => Err(format!("Unknown notification type: {s}")),
        }
    }
}

impl NotificationCreateDBRequest {
    pub fn new(user_id: UserId, notification_type: NotificationType, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id,
            notification_type,
            title: title.into(),
            message: message.into(),
            link: None,
            metadata: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A metered balance at or below this raises a `credit_low` notification
pub const CREDITS_LOW_THRESHOLD: i32 = 10;

/// Share of a code's `max_scans` at which its owner is warned
pub const SCAN_LIMIT_WARNING_PERCENT: i64 = 80;

/// True when spending took the balance from above the low-credit threshold to at or below it
pub fn credit_low_crossed(before: i32, after: i32) -> bool {
    before > CREDITS_LOW_THRESHOLD && after <= CREDITS_LOW_THRESHOLD
}

/// True when one more scan moved a capped code into the warning band
/// (at least 80% of `max_scans`, not yet exhausted)
pub fn scan_limit_warning_crossed(before: i32, after: i32, max_scans: i32) -> bool {
    let in_band = |count: i32| i64::from(count) * 100 >= SCAN_LIMIT_WARNING_PERCENT * i64::from(max_scans);
    max_scans > 0 && !in_band(before) && in_band(after) && after < max_scans
}

/// Best-effort notification insert.
///
/// Runs under a savepoint when `conn` is inside a transaction, so a failed
/// insert does not poison the caller's work.
pub async fn notify(conn: &mut PgConnection, request: NotificationCreateDBRequest) -> Option<NotificationId> {
    let user_id = request.user_id;
    let kind = request.notification_type;
    let warn = |e: &dyn std::fmt::Display| {
        tracing::warn!(
            user_id = %abbrev_uuid(&user_id),
            notification_type = kind.as_str(),
            error = %e,
            "Failed to create notification"
        );
    };

    let mut savepoint = match conn.begin().await {
        Ok(sp) => sp,
        Err(e) => {
            warn(&e);
            return None;
        }
    };

    match Notifications::new(&mut savepoint).create(&request).await {
        Ok(notification) => match savepoint.commit().await {
            Ok(()) => Some(notification.id),
            Err(e) => {
                warn(&e);
                None
            }
        },
        Err(e) => {
            warn(&e);
            if let Err(e) = savepoint.rollback().await {
                warn(&e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn type_text_round_trip() {
        for kind in [
            NotificationType::Info,
            NotificationType::Warning,
            NotificationType::Error,
            NotificationType::Success,
            NotificationType::UsageAlert,
            NotificationType::CreditLow,
            NotificationType::DomainVerified,
            NotificationType::ThresholdCrossed,
        ] {
            assert_eq!(kind.as_str().parse::<NotificationType>().unwrap(), kind);
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
        assert!("alert".parse::<NotificationType>().is_err());
    }

    #[test]
    fn credit_low_fires_once_on_the_way_down() {
        assert!(credit_low_crossed(12, 10));
        assert!(credit_low_crossed(14, 8));
        assert!(!credit_low_crossed(10, 8));
        assert!(!credit_low_crossed(100, 96));
    }

    #[test]
    fn scan_warning_band_starts_at_eighty_percent() {
        assert!(scan_limit_warning_crossed(7, 8, 10));
        assert!(!scan_limit_warning_crossed(8, 9, 10));
        assert!(!scan_limit_warning_crossed(6, 7, 10));
        // 100% is the limit itself, not a warning
        assert!(!scan_limit_warning_crossed(0, 1, 1));
        assert!(scan_limit_warning_crossed(79, 80, 100));
        assert!(!scan_limit_warning_crossed(0, 1, 0));
    }

    #[test]
    fn request_builder() {
        let user = Uuid::new_v4();
        let req = NotificationCreateDBRequest::new(user, NotificationType::Success, "Paid", "Credits added")
            .with_link("/dashboard")
            .with_metadata(serde_json::json!({"credits": 100}));
        assert_eq!(req.user_id, user);
        assert_eq!(req.link.as_deref(), Some("/dashboard"));
        assert_eq!(req.metadata.unwrap()["credits"], 100);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_failed_notify_leaves_transaction_usable(pool: sqlx::PgPool) {
        let user = crate::test_utils::create_test_user(&pool, crate::entitlements::PlanName::Free).await;
        let mut tx = pool.begin().await.unwrap();

        let orphan = NotificationCreateDBRequest::new(Uuid::new_v4(), NotificationType::Info, "Lost", "No such user");
        assert!(notify(&mut tx, orphan).await.is_none());

        let delivered = NotificationCreateDBRequest::new(user.id, NotificationType::Info, "Hello", "Still works");
        assert!(notify(&mut tx, delivered).await.is_some());
        tx.commit().await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(Notifications::new(&mut conn).unread_count(user.id).await.unwrap(), 1);
    }
}
