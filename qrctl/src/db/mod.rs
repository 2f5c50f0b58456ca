//! Database layer: PostgreSQL via SQLx, organised as repositories over records.
//!
//! ```text
//! api handlers ─→ db::handlers (repositories) ─→ db::models (records) ─→ PostgreSQL
//! ```
//!
//! Migrations live in `migrations/` and are applied at startup through
//! [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
pub mod pool_metrics;
