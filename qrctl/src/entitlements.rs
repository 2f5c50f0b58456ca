//! Plan entitlements and quota enforcement.
//!
//! Every user carries a plan name. The plan resolves to a static
//! [`PlanEntitlements`] table; anything unrecognised (including no plan at all)
//! resolves to FREE. Quota checks compare a [`UsageSnapshot`] against the
//! resolved limits and fail with [`Error::PlanLimit`] exactly when usage has
//! reached the limit.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::errors::{Error, PLAN_LIMIT_QR_CODES, PLAN_LIMIT_SCANS, Result};
use crate::types::UserId;

/// Subscription plans known to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanName {
    Free,
    Flex,
    Pro,
    Business,
}

impl PlanName {
    pub const ALL: [PlanName; 4] = [PlanName::Free, PlanName::Flex, PlanName::Pro, PlanName::Business];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanName::Free => "FREE",
            PlanName::Flex => "FLEX",
            PlanName::Pro => "PRO",
            PlanName::Business => "BUSINESS",
        }
    }

    /// Resolve a stored plan column. Missing or unknown values fall back to FREE.
    pub fn resolve(plan: Option<&str>) -> Self {
        plan.and_then(|p| p.parse().ok()).unwrap_or(PlanName::Free)
    }

    /// The plan suggested in upgrade prompts
    pub fn upgrade_target(&self) -> PlanName {
        match self {
            PlanName::Free => PlanName::Pro,
            _ => PlanName::Business,
        }
    }

    /// Whether QR creation on this plan spends credits
    pub fn meters_credits(&self) -> bool {
        matches!(self, PlanName::Flex)
    }
}

impl fmt::Display for PlanName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FREE" => Ok(PlanName::Free),
            "FLEX" => Ok(PlanName::Flex),
            "PRO" => Ok(PlanName::Pro),
            "BUSINESS" => Ok(PlanName::Business),
            other => Err(format!("Unknown plan: {other}")),
        }
    }
}

/// Limits and feature switches granted by a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlanEntitlements {
    pub plan: PlanName,
    #[schema(value_type = String)]
    pub display_name: &'static str,
    pub max_qr_codes: i64,
    pub monthly_scan_quota: i64,
    pub dynamic_qr: bool,
    pub custom_domains: bool,
    pub webhooks: bool,
    pub remove_watermark: bool,
    pub remove_ads: bool,
    pub logo_uploads: bool,
    pub file_storage_mb: i64,
    pub monthly_price_cents: i64,
}

static FREE: PlanEntitlements = PlanEntitlements {
    plan: PlanName::Free,
    display_name: "Free",
    max_qr_codes: 10,
    monthly_scan_quota: 1_000,
    dynamic_qr: false,
    custom_domains: false,
    webhooks: false,
    remove_watermark: false,
    remove_ads: true,
    logo_uploads: true,
    file_storage_mb: 100,
    monthly_price_cents: 0,
};

static FLEX: PlanEntitlements = PlanEntitlements {
    plan: PlanName::Flex,
    display_name: "Flex (Credits)",
    max_qr_codes: 100,
    monthly_scan_quota: 10_000,
    dynamic_qr: true,
    custom_domains: false,
    webhooks: false,
    remove_watermark: true,
    remove_ads: true,
    logo_uploads: true,
    file_storage_mb: 250,
    monthly_price_cents: 0,
};

static PRO: PlanEntitlements = PlanEntitlements {
    plan: PlanName::Pro,
    display_name: "Pro",
    max_qr_codes: 1_000,
    monthly_scan_quota: 100_000,
    dynamic_qr: true,
    custom_domains: true,
    webhooks: true,
    remove_watermark: true,
    remove_ads: true,
    logo_uploads: true,
    file_storage_mb: 500,
    monthly_price_cents: 1_999,
};

static BUSINESS: PlanEntitlements = PlanEntitlements {
    plan: PlanName::Business,
    display_name: "Business",
    max_qr_codes: 10_000,
    monthly_scan_quota: 1_000_000,
    dynamic_qr: true,
    custom_domains: true,
    webhooks: true,
    remove_watermark: true,
    remove_ads: true,
    logo_uploads: true,
    file_storage_mb: 2_000,
    monthly_price_cents: 4_999,
};

impl PlanName {
    pub fn entitlements(&self) -> &'static PlanEntitlements {
        match self {
            PlanName::Free => &FREE,
            PlanName::Flex => &FLEX,
            PlanName::Pro => &PRO,
            PlanName::Business => &BUSINESS,
        }
    }
}

/// Look up the entitlements for a stored plan name, defaulting to FREE.
pub fn get_entitlements(plan: Option<&str>) -> &'static PlanEntitlements {
    PlanName::resolve(plan).entitlements()
}

/// Boolean features gated by plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    DynamicQr,
    CustomDomains,
    Webhooks,
    RemoveWatermark,
    RemoveAds,
    LogoUploads,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::DynamicQr => "dynamic_qr",
            Feature::CustomDomains => "custom_domains",
            Feature::Webhooks => "webhooks",
            Feature::RemoveWatermark => "remove_watermark",
            Feature::RemoveAds => "remove_ads",
            Feature::LogoUploads => "logo_uploads",
        }
    }
}

impl PlanEntitlements {
    pub fn allows(&self, feature: Feature) -> bool {
        match feature {
            Feature::DynamicQr => self.dynamic_qr,
            Feature::CustomDomains => self.custom_domains,
            Feature::Webhooks => self.webhooks,
            Feature::RemoveWatermark => self.remove_watermark,
            Feature::RemoveAds => self.remove_ads,
            Feature::LogoUploads => self.logo_uploads,
        }
    }
}

pub fn has_feature(plan: PlanName, feature: Feature) -> bool {
    plan.entitlements().allows(feature)
}

pub fn assert_feature(plan: PlanName, feature: Feature) -> Result<()> {
    if has_feature(plan, feature) {
        Ok(())
    } else {
        Err(Error::FeatureNotAllowed {
            feature: feature.as_str().to_string(),
        })
    }
}

/// Point-in-time counts used for quota checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct UsageSnapshot {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub qr_codes_count: i64,
    pub monthly_scan_count: i64,
}

/// Midnight UTC on the first day of `now`'s month
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub fn assert_can_create_qr(plan: PlanName, usage: &UsageSnapshot) -> Result<()> {
    let ent = plan.entitlements();
    if usage.qr_codes_count >= ent.max_qr_codes {
        return Err(Error::PlanLimit {
            code: PLAN_LIMIT_QR_CODES,
            message: format!(
                "QR code limit reached for your plan ({}). Upgrade to {} to increase your limit.",
                ent.max_qr_codes,
                plan.upgrade_target()
            ),
        });
    }
    Ok(())
}

pub fn assert_within_monthly_scan_quota(plan: PlanName, usage: &UsageSnapshot) -> Result<()> {
    let ent = plan.entitlements();
    if usage.monthly_scan_count >= ent.monthly_scan_quota {
        return Err(Error::PlanLimit {
            code: PLAN_LIMIT_SCANS,
            message: format!(
                "Monthly scan quota reached for your plan ({}). Consider upgrading.",
                ent.monthly_scan_quota
            ),
        });
    }
    Ok(())
}

/// Scan count at which the owner gets a usage alert (80% of quota)
pub fn scan_alert_threshold(plan: PlanName) -> i64 {
    plan.entitlements().monthly_scan_quota * 8 / 10
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn usage(qr: i64, scans: i64) -> UsageSnapshot {
        UsageSnapshot {
            user_id: Uuid::new_v4(),
            qr_codes_count: qr,
            monthly_scan_count: scans,
        }
    }

    #[test]
    fn unknown_and_missing_plans_resolve_to_free() {
        assert_eq!(get_entitlements(None).plan, PlanName::Free);
        assert_eq!(get_entitlements(Some("ENTERPRISE")).plan, PlanName::Free);
        assert_eq!(get_entitlements(Some("")).plan, PlanName::Free);
        assert_eq!(get_entitlements(Some("pro")).plan, PlanName::Pro);
        assert_eq!(get_entitlements(Some(" business ")).plan, PlanName::Business);
    }

    #[test]
    fn plan_table_values() {
        let free = get_entitlements(Some("FREE"));
        assert_eq!((free.max_qr_codes, free.monthly_scan_quota), (10, 1_000));
        assert!(!free.dynamic_qr && !free.webhooks && !free.remove_watermark);
        assert!(free.remove_ads && free.logo_uploads);

        let flex = get_entitlements(Some("FLEX"));
        assert_eq!(flex.display_name, "Flex (Credits)");
        assert!(flex.dynamic_qr && !flex.custom_domains && !flex.webhooks);

        let pro = get_entitlements(Some("PRO"));
        assert_eq!(pro.monthly_price_cents, 1_999);
        assert_eq!(pro.file_storage_mb, 500);

        let business = get_entitlements(Some("BUSINESS"));
        assert_eq!((business.max_qr_codes, business.monthly_scan_quota), (10_000, 1_000_000));
        assert_eq!(business.monthly_price_cents, 4_999);
    }

    #[test]
    fn qr_limit_fails_exactly_at_limit() {
        assert!(assert_can_create_qr(PlanName::Free, &usage(9, 0)).is_ok());
        let err = assert_can_create_qr(PlanName::Free, &usage(10, 0)).unwrap_err();
        match err {
            Error::PlanLimit { code, message } => {
                assert_eq!(code, PLAN_LIMIT_QR_CODES);
                assert_eq!(
                    message,
                    "QR code limit reached for your plan (10). Upgrade to PRO to increase your limit."
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(assert_can_create_qr(PlanName::Free, &usage(11, 0)).is_err());
    }

    #[test]
    fn paid_plans_suggest_business() {
        let err = assert_can_create_qr(PlanName::Pro, &usage(1_000, 0)).unwrap_err();
        assert!(err.to_string().contains("Upgrade to BUSINESS"));
    }

    #[test]
    fn scan_quota_fails_exactly_at_quota() {
        assert!(assert_within_monthly_scan_quota(PlanName::Flex, &usage(0, 9_999)).is_ok());
        let err = assert_within_monthly_scan_quota(PlanName::Flex, &usage(0, 10_000)).unwrap_err();
        assert_eq!(err.code(), PLAN_LIMIT_SCANS);
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(
            err.to_string(),
            "Monthly scan quota reached for your plan (10000). Consider upgrading."
        );
    }

    #[test]
    fn feature_gates() {
        assert!(!has_feature(PlanName::Free, Feature::DynamicQr));
        assert!(has_feature(PlanName::Flex, Feature::DynamicQr));
        assert!(assert_feature(PlanName::Pro, Feature::Webhooks).is_ok());
        assert!(matches!(
            assert_feature(PlanName::Flex, Feature::CustomDomains),
            Err(Error::FeatureNotAllowed { feature }) if feature == "custom_domains"
        ));
    }

    #[test]
    fn month_start_is_first_midnight_utc() {
        let now = Utc.with_ymd_and_hms(2026, 3, 17, 13, 45, 2).unwrap();
        assert_eq!(month_start(now), Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        let first = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(month_start(first), first);
    }

    #[test]
    fn alert_threshold_is_eighty_percent() {
        assert_eq!(scan_alert_threshold(PlanName::Free), 800);
        assert_eq!(scan_alert_threshold(PlanName::Business), 800_000);
    }
}
