//! HTTP API: route handlers and their request/response models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Authentication** (`/auth/*`): register, login, logout
//! - **Dashboard** (`/api/*`): session-authenticated QR codes, organizations,
//!   billing, credits, API keys, notifications, custom domains and admin tools
//! - **Scan recording** (`/api/scan/{id}`): public
//! - **Developer API** (`/api/v1/*`): API-key authenticated, rate limited and metered
//! - **Gateway webhooks** (`/webhooks/*`): unauthenticated, signature-checked
//!
//! All endpoints carry `utoipa` annotations; Scalar references are served at `/docs`
//! (dashboard) and `/docs/developer` (developer API).

pub mod handlers;
pub mod models;
