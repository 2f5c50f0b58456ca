//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection` (a pooled connection or an open
//! transaction) and returns records from [`crate::db::models`]. Entities with a
//! plain CRUD shape implement [`Repository`]; the rest expose purpose-built
//! queries only.
//!
//! ```ignore
//! use qrctl::db::handlers::{QrCodes, Repository};
//!
//! let mut tx = pool.begin().await?;
//! let qr = QrCodes::new(&mut tx).get_by_id(id).await?;
//! tx.commit().await?;
//! ```
//!
//! Writes that must be atomic with other writes (payment fulfilment, webhook
//! idempotency, rate-limit windows) are always run inside a transaction.

pub mod api_keys;
pub mod api_usage;
pub mod billing;
pub mod custom_domains;
pub mod notifications;
pub mod organizations;
pub mod payments;
pub mod qr_codes;
pub mod rate_limits;
pub mod repository;
pub mod users;
pub mod webhook_outbox;

pub use api_keys::ApiKeys;
pub use api_usage::ApiUsage;
pub use billing::Billing;
pub use custom_domains::CustomDomains;
pub use notifications::Notifications;
pub use organizations::Organizations;
pub use payments::Payments;
pub use qr_codes::QrCodes;
pub use rate_limits::RateLimits;
pub use repository::Repository;
pub use users::Users;
pub use webhook_outbox::WebhookOutbox;
