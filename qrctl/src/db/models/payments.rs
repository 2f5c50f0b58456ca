//! Database models for one-off credit purchases.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{PaymentId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Created,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown payment status: {s}")),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentDBResponse {
    pub id: PaymentId,
    pub user_id: UserId,
    pub razorpay_order_id: String,
    pub razorpay_payment_id: Option<String>,
    /// Smallest currency unit (paise)
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub credits_added: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentDBResponse {
    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct PaymentCreateDBRequest {
    pub user_id: UserId,
    pub razorpay_order_id: String,
    pub amount: i64,
    pub currency: String,
}
