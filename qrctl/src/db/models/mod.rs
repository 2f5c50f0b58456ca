//! Database record models matching table schemas.
//!
//! Records derive `sqlx::FromRow` and keep enum-like columns as `String`, with
//! typed accessors where callers need them. API representations live in
//! [`crate::api::models`] and convert from these.

pub mod api_keys;
pub mod billing;
pub mod custom_domains;
pub mod notifications;
pub mod organizations;
pub mod payments;
pub mod qr_codes;
pub mod rate_limits;
pub mod users;
pub mod webhook_outbox;
