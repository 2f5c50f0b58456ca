//! API request and response models.
//!
//! API models are kept apart from the database records in [`crate::db::models`]
//! so storage can change without changing the wire contract. Every model derives
//! `utoipa::ToSchema` (or `IntoParams` for query strings). Secrets such as API
//! keys and webhook signing secrets only appear in the responses that create them.

pub mod admin;
pub mod api_keys;
pub mod auth;
pub mod billing;
pub mod custom_domains;
pub mod notifications;
pub mod organizations;
pub mod pagination;
pub mod payments;
pub mod qr_codes;
pub mod users;
pub mod webhooks;
