//! API models for credit purchases.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Fields the checkout widget hands back after a successful payment
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PaymentStatusQuery {
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub status: String,
    pub paid: bool,
    pub credits: i32,
}
