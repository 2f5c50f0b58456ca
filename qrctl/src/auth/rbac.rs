//! Organization roles and the capabilities each one grants.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Role of a user inside an organization. Stored lower-case in `organization_members.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Owner => "owner",
            OrgRole::Admin => "admin",
            OrgRole::Member => "member",
        }
    }

    /// Any member can read organization resources
    pub fn can_access(&self) -> bool {
        true
    }

    pub fn can_manage_members(&self) -> bool {
        matches!(self, OrgRole::Owner | OrgRole::Admin)
    }

    pub fn can_manage_settings(&self) -> bool {
        matches!(self, OrgRole::Owner)
    }
}

impl std::fmt::Display for OrgRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrgRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(OrgRole::Owner),
            "admin" => Ok(OrgRole::Admin),
            "member" => Ok(OrgRole::Member),
            other => Err(format!("Unknown organization role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_table() {
        let cases = [
            (OrgRole::Owner, true, true, true),
            (OrgRole::Admin, true, true, false),
            (OrgRole::Member, true, false, false),
        ];
        for (role, access, members, settings) in cases {
            assert_eq!(role.can_access(), access, "{role} access");
            assert_eq!(role.can_manage_members(), members, "{role} members");
            assert_eq!(role.can_manage_settings(), settings, "{role} settings");
        }
    }

    #[test]
    fn parse_roles() {
        assert_eq!("Owner".parse::<OrgRole>().unwrap(), OrgRole::Owner);
        assert_eq!(" admin ".parse::<OrgRole>().unwrap(), OrgRole::Admin);
        assert_eq!("member".parse::<OrgRole>().unwrap(), OrgRole::Member);
        assert!("viewer".parse::<OrgRole>().is_err());
    }

    #[test]
    fn serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&OrgRole::Admin).unwrap(), "\"admin\"");
        let role: OrgRole = serde_json::from_str("\"owner\"").unwrap();
        assert_eq!(role, OrgRole::Owner);
    }
}
