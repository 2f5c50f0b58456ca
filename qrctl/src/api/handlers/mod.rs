//! HTTP request handlers, grouped by resource.
//!
//! Handlers validate input, check access through the auth extractors
//! ([`crate::api::models::users::CurrentUser`], [`crate::auth::current_user::AdminUser`],
//! [`crate::auth::api_key::ApiKeyAuth`]), run repository calls and return
//! [`crate::errors::Error`] on failure, which renders as `{error, code}` JSON.
//!
//! - [`auth`]: registration, login, logout, `/api/me`
//! - [`qr_codes`]: dashboard QR CRUD and analytics
//! - [`scan`]: public scan recording
//! - [`billing`]: subscription status, invoices, credits, subscription webhooks
//! - [`payments`]: one-off credit purchases and payment webhooks
//! - [`api_keys`]: developer key management
//! - [`organizations`]: organizations, members, invitations
//! - [`notifications`]: in-app notifications
//! - [`custom_domains`]: custom domain registration and verification
//! - [`admin`]: platform administration
//! - [`v1`]: the public developer API

pub mod admin;
pub mod api_keys;
pub mod auth;
pub mod billing;
pub mod custom_domains;
pub mod notifications;
pub mod organizations;
pub mod payments;
pub mod qr_codes;
pub mod scan;
pub mod v1;
