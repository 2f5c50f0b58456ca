//! Authentication and authorization.
//!
//! # Authentication Methods
//!
//! Dashboard routes (`/api/*`) take a [`CurrentUser`](crate::api::models::users::CurrentUser),
//! resolved in order from:
//! 1. the JWT session cookie set by `/auth/login` (native auth)
//! 2. a trusted proxy header carrying the user's email, optionally creating the user
//!
//! The user row is re-read on each request, so locking an account takes effect
//! immediately: locked users get 403.
//!
//! The developer surface (`/api/v1/*`) takes an [`ApiKeyAuth`](api_key::ApiKeyAuth)
//! from an `Authorization: Bearer sk_...` header. Keys carry scopes and are rate limited.
//!
//! # Authorization
//!
//! - Ownership: users act on their own QR codes, keys, domains and notifications
//! - Organizations: [`rbac::OrgRole`] capabilities gate org resources
//! - Admin: the `is_admin` flag or the configured allow-list, see [`current_user::AdminUser`]
//!
//! # Modules
//!
//! - [`api_key`]: bearer key extractor and scopes
//! - [`current_user`]: session/proxy extractors
//! - [`password`]: Argon2 hashing
//! - [`rbac`]: organization roles
//! - [`session`]: JWT tokens and cookies

pub mod api_key;
pub mod current_user;
pub mod password;
pub mod rbac;
pub mod session;
