//! Credit pricing for QR code creation.
//!
//! A standard static code costs [`STANDARD_COST`] credits; anything using a
//! premium capability (dynamic redirects, social templates, UPI payments or
//! advanced styling) costs [`PREMIUM_COST`]. Only metered plans actually spend
//! credits, see [`crate::entitlements::PlanName::meters_credits`].

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entitlements::PlanName;

pub const STANDARD_COST: i32 = 2;
pub const PREMIUM_COST: i32 = 4;

/// Templates priced at the standard rate even though they are styled
const STANDARD_TEMPLATES: &[&str] = &["business", "creative"];

const SOCIAL_TEMPLATES: &[&str] = &[
    "instagram",
    "facebook",
    "twitter",
    "x",
    "linkedin",
    "youtube",
    "tiktok",
    "whatsapp",
    "telegram",
    "snapchat",
    "pinterest",
];

/// The attributes of a QR code that affect its price
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QrCreditInput {
    pub is_dynamic: bool,
    pub template: Option<String>,
    pub url: Option<String>,
    pub has_gradient: bool,
    pub has_sticker: bool,
    pub has_effects: bool,
}

pub fn is_social_template(template: &str) -> bool {
    let t = template.to_ascii_lowercase();
    SOCIAL_TEMPLATES.contains(&t.as_str())
}

/// Price of a single QR code. First matching rule wins.
pub fn credit_cost(input: &QrCreditInput) -> i32 {
    if input.is_dynamic {
        return PREMIUM_COST;
    }

    let template = input.template.as_deref().map(str::to_ascii_lowercase);
    if let Some(t) = template.as_deref() {
        if STANDARD_TEMPLATES.contains(&t) {
            return STANDARD_COST;
        }
        if is_social_template(t) {
            return PREMIUM_COST;
        }
    }

    // "upi://" is covered by the substring check
    let upi_url = input.url.as_deref().is_some_and(|u| u.to_ascii_lowercase().contains("upi"));
    if template.as_deref() == Some("upi") || upi_url {
        return PREMIUM_COST;
    }

    if input.has_gradient || input.has_sticker || input.has_effects {
        return PREMIUM_COST;
    }

    STANDARD_COST
}

pub fn total_credits_used<'a>(inputs: impl IntoIterator<Item = &'a QrCreditInput>) -> i64 {
    inputs.into_iter().map(|i| i64::from(credit_cost(i))).sum()
}

/// How many QR codes a balance can still buy, all-premium to all-standard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct QrCapacity {
    pub min: i64,
    pub max: i64,
}

pub fn qr_capacity_from_credits(credits: i64) -> QrCapacity {
    let credits = credits.max(0);
    QrCapacity {
        min: credits / i64::from(PREMIUM_COST),
        max: credits / i64::from(STANDARD_COST),
    }
}

/// Credits included with a plan
pub fn credits_for_plan(plan: PlanName) -> i64 {
    match plan {
        PlanName::Flex | PlanName::Pro => 100,
        PlanName::Business => 1_000,
        PlanName::Free => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> QrCreditInput {
        QrCreditInput {
            url: Some("https://example.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn static_code_costs_standard() {
        assert_eq!(credit_cost(&input()), 2);
        assert_eq!(credit_cost(&QrCreditInput::default()), 2);
    }

    #[test]
    fn dynamic_wins_over_everything() {
        let qr = QrCreditInput {
            is_dynamic: true,
            template: Some("business".to_string()),
            ..input()
        };
        assert_eq!(credit_cost(&qr), 4);
    }

    #[test]
    fn business_and_creative_templates_are_standard_even_with_styling() {
        for template in ["business", "Creative", "BUSINESS"] {
            let qr = QrCreditInput {
                template: Some(template.to_string()),
                has_gradient: true,
                url: Some("upi://pay?pa=someone@bank".to_string()),
                ..input()
            };
            assert_eq!(credit_cost(&qr), 2, "template {template}");
        }
    }

    #[test]
    fn social_templates_are_premium() {
        let qr = QrCreditInput {
            template: Some("Instagram".to_string()),
            ..input()
        };
        assert_eq!(credit_cost(&qr), 4);
    }

    #[test]
    fn upi_detection() {
        let by_template = QrCreditInput {
            template: Some("UPI".to_string()),
            ..input()
        };
        assert_eq!(credit_cost(&by_template), 4);

        let by_scheme = QrCreditInput {
            url: Some("UPI://pay?pa=shop@okaxis".to_string()),
            ..Default::default()
        };
        assert_eq!(credit_cost(&by_scheme), 4);

        let by_substring = QrCreditInput {
            url: Some("https://pay.example.com/upi/123".to_string()),
            ..Default::default()
        };
        assert_eq!(credit_cost(&by_substring), 4);
    }

    #[test]
    fn advanced_styling_is_premium() {
        for qr in [
            QrCreditInput { has_gradient: true, ..input() },
            QrCreditInput { has_sticker: true, ..input() },
            QrCreditInput { has_effects: true, ..input() },
        ] {
            assert_eq!(credit_cost(&qr), 4);
        }
    }

    #[test]
    fn unknown_template_falls_through() {
        let qr = QrCreditInput {
            template: Some("minimal".to_string()),
            ..input()
        };
        assert_eq!(credit_cost(&qr), 2);
    }

    #[test]
    fn totals_and_capacity() {
        let codes = vec![input(), QrCreditInput { is_dynamic: true, ..input() }, input()];
        assert_eq!(total_credits_used(&codes), 8);
        assert_eq!(qr_capacity_from_credits(101), QrCapacity { min: 25, max: 50 });
        assert_eq!(qr_capacity_from_credits(-3), QrCapacity { min: 0, max: 0 });
    }

    #[test]
    fn plan_credit_grants() {
        assert_eq!(credits_for_plan(PlanName::Free), 0);
        assert_eq!(credits_for_plan(PlanName::Flex), 100);
        assert_eq!(credits_for_plan(PlanName::Pro), 100);
        assert_eq!(credits_for_plan(PlanName::Business), 1_000);
    }
}
