//! Subscription lifecycle and billing access enforcement.
//!
//! Subscriptions move `trialing → active → past_due → canceled` (plus `incomplete`)
//! in response to gateway webhooks, see [`reconcile`]. Access decisions are pure
//! functions of the latest live subscription and the current time.

pub mod reconcile;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::billing::SubscriptionDBResponse;

/// How long access continues after a failed renewal or a cancellation
pub const GRACE_PERIOD: Duration = Duration::days(7);

/// Where the dashboard should send a locked-out user
pub const BILLING_SETTINGS_PATH: &str = "/dashboard/settings/billing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Incomplete,
}

impl SubscriptionStatus {
    /// Statuses considered when looking up a user's current subscription
    pub const LIVE: [SubscriptionStatus; 3] = [Self::Active, Self::Trialing, Self::PastDue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "canceled" => Ok(Self::Canceled),
            "incomplete" => Ok(Self::Incomplete),
            _ => Err(format!("Unknown subscription status: {s}")),
        }
    }
}

/// The parts of a subscription access rules look at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionState {
    pub status: SubscriptionStatus,
    pub grace_until: Option<DateTime<Utc>>,
}

impl From<&SubscriptionDBResponse> for SubscriptionState {
    fn from(sub: &SubscriptionDBResponse) -> Self {
        Self {
            status: sub.status(),
            grace_until: sub.grace_until,
        }
    }
}

pub fn is_in_grace_period(sub: &SubscriptionState, now: DateTime<Utc>) -> bool {
    sub.grace_until.is_some_and(|until| until > now)
}

/// Users without a subscription are never locked out. A canceled or incomplete
/// subscription locks the user out once its grace period has ended; `past_due`
/// keeps access.
pub fn is_locked_out(sub: Option<&SubscriptionState>, now: DateTime<Utc>) -> bool {
    let Some(sub) = sub else {
        return false;
    };
    match sub.status {
        SubscriptionStatus::Canceled | SubscriptionStatus::Incomplete => !is_in_grace_period(sub, now),
        SubscriptionStatus::PastDue | SubscriptionStatus::Active | SubscriptionStatus::Trialing => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BillingAccess {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl BillingAccess {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            redirect: None,
        }
    }
}

pub fn check_billing_access(sub: Option<&SubscriptionState>, now: DateTime<Utc>) -> BillingAccess {
    if is_locked_out(sub, now) {
        return BillingAccess {
            allowed: false,
            reason: Some("subscription_inactive".to_string()),
            redirect: Some(BILLING_SETTINGS_PATH.to_string()),
        };
    }

    if sub.is_some_and(|s| is_in_grace_period(s, now)) {
        return BillingAccess {
            allowed: true,
            reason: Some("grace_period".to_string()),
            redirect: None,
        };
    }

    BillingAccess::allowed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(status: SubscriptionStatus, grace_until: Option<DateTime<Utc>>) -> SubscriptionState {
        SubscriptionState { status, grace_until }
    }

    #[test]
    fn no_subscription_is_never_locked() {
        let now = Utc::now();
        assert!(!is_locked_out(None, now));
        assert_eq!(check_billing_access(None, now), BillingAccess::allowed());
    }

    #[test]
    fn canceled_locks_out_after_grace() {
        let now = Utc::now();
        let in_grace = state(SubscriptionStatus::Canceled, Some(now + Duration::days(2)));
        let expired = state(SubscriptionStatus::Canceled, Some(now - Duration::seconds(1)));
        let no_grace = state(SubscriptionStatus::Incomplete, None);

        assert!(!is_locked_out(Some(&in_grace), now));
        assert!(is_locked_out(Some(&expired), now));
        assert!(is_locked_out(Some(&no_grace), now));

        let access = check_billing_access(Some(&expired), now);
        assert!(!access.allowed);
        assert_eq!(access.reason.as_deref(), Some("subscription_inactive"));
        assert_eq!(access.redirect.as_deref(), Some("/dashboard/settings/billing"));
    }

    #[test]
    fn grace_boundary_is_exclusive() {
        let now = Utc::now();
        let sub = state(SubscriptionStatus::Canceled, Some(now));
        assert!(!is_in_grace_period(&sub, now));
        assert!(is_locked_out(Some(&sub), now));
    }

    #[test]
    fn past_due_keeps_access_and_reports_grace() {
        let now = Utc::now();
        let sub = state(SubscriptionStatus::PastDue, Some(now + GRACE_PERIOD));
        assert!(!is_locked_out(Some(&sub), now));

        let access = check_billing_access(Some(&sub), now);
        assert!(access.allowed);
        assert_eq!(access.reason.as_deref(), Some("grace_period"));
        assert!(access.redirect.is_none());

        // Still allowed once grace has passed
        let later = now + GRACE_PERIOD + Duration::days(1);
        assert_eq!(check_billing_access(Some(&sub), later), BillingAccess::allowed());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Incomplete,
        ] {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<SubscriptionStatus>().is_err());
        assert_eq!(serde_json::to_string(&SubscriptionStatus::PastDue).unwrap(), "\"past_due\"");
    }
}
