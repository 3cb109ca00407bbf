//! Resolved caller identity

use crate::error::{GovernanceError, GovernanceResult};
use crate::KEY_DELIMITER;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform role, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Learner,
    Mentor,
    OrgAdmin,
    SuperAdmin,
}

impl Role {
    /// Whether this role is at least as privileged as `required`
    pub fn meets(&self, required: Role) -> bool {
        *self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Learner => "learner",
            Role::Mentor => "mentor",
            Role::OrgAdmin => "org_admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant identifier, guaranteed safe to use as a key segment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrganizationId(String);

impl OrganizationId {
    pub fn parse(value: impl Into<String>) -> GovernanceResult<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(GovernanceError::Validation("organization id is empty".into()));
        }
        if value.contains(KEY_DELIMITER) {
            return Err(GovernanceError::Validation(format!(
                "organization id must not contain '{KEY_DELIMITER}'"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrganizationId {
    type Error = GovernanceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<OrganizationId> for String {
    fn from(id: OrganizationId) -> Self {
        id.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity, tenant and role for the current request.
///
/// Derived fresh from a verified credential on every request and never
/// persisted. Only the resolver constructs principals outside of tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject_id: String,
    /// `None` only for [`Role::SuperAdmin`]
    pub organization_id: Option<OrganizationId>,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    /// Tenant to attribute audit records to
    pub fn tenant(&self) -> Option<&OrganizationId> {
        self.organization_id.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(subject: &str, org: Option<&str>, role: Role) -> Self {
        let now = Utc::now();
        Self {
            subject_id: subject.to_string(),
            organization_id: org.map(|o| OrganizationId::parse(o).expect("valid org")),
            role,
            issued_at: now,
            expires_at: now + chrono::Duration::hours(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::SuperAdmin.meets(Role::OrgAdmin));
        assert!(Role::OrgAdmin.meets(Role::Mentor));
        assert!(Role::Mentor.meets(Role::Learner));
        assert!(!Role::Learner.meets(Role::Mentor));
        assert!(Role::Learner.meets(Role::Learner));
    }

    #[test]
    fn test_organization_id_rejects_delimiter() {
        assert!(OrganizationId::parse("org-a").is_ok());
        assert!(OrganizationId::parse("org:a").is_err());
        assert!(OrganizationId::parse("").is_err());
    }

    #[test]
    fn test_organization_id_serde_validates() {
        let ok: OrganizationId = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(ok.as_str(), "acme");
        assert!(serde_json::from_str::<OrganizationId>("\"ac:me\"").is_err());
    }
}
