//! Common type definitions and access-control vocabulary.
//!
//! This module defines:
//! - Type aliases for entity IDs (UserId, QrCodeId, etc.)
//! - The [`Resource`] / [`Operation`] / [`Permission`] triple carried by
//!   authorization errors
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`QrCodeId`]: QR code identifier
//! - [`ScanId`]: Single recorded scan
//! - [`ApiKeyId`]: Developer API key identifier
//! - [`OrganizationId`]: Organization identifier
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::auth::rbac::OrgRole;

// Type aliases for IDs
pub type UserId = Uuid;
pub type QrCodeId = Uuid;
pub type ScanId = Uuid;
pub type ApiKeyId = Uuid;
pub type OrganizationId = Uuid;
pub type InvitationId = Uuid;
pub type NotificationId = Uuid;
pub type SubscriptionId = Uuid;
pub type InvoiceId = Uuid;
pub type PaymentId = Uuid;
pub type OutboxId = Uuid;
pub type DomainId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Operations that can be performed on resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
    Manage,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Manage => "manage",
        };
        f.write_str(s)
    }
}

/// Entity types that access checks are made against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Resource {
    QrCodes,
    Scans,
    Webhooks,
    ApiKeys,
    Organizations,
    Members,
    Billing,
    Users,
    Domains,
    Notifications,
}

/// What a caller would have needed for a denied request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// Plain ownership of the resource
    Owner(Resource),
    /// A developer API key scope such as `qr:write`
    Scope(String),
    /// A minimum role within an organization
    OrgRole(OrgRole),
    /// Platform administrator
    Admin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbrev_uuid_keeps_first_segment() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }

    #[test]
    fn operation_display_is_lowercase() {
        assert_eq!(Operation::Manage.to_string(), "manage");
        assert_eq!(format!("{}", Operation::Delete), "delete");
    }
}
