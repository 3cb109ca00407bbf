//! Cross-tenant access control
//!
//! SuperAdmin is always allowed. Everyone else needs a matching tenant and a
//! role at or above the action's minimum. A principal without a tenant is
//! denied outright, even though the resolver should never produce one.

use crate::audit::{AuditEvent, AuditLog, AuditOutcome, ClientInfo};
use crate::error::{DenyReason, GovernanceError, GovernanceResult};
use crate::principal::{OrganizationId, Principal, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Governed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    // Organizations
    CreateOrganization,
    UpdateOrganization,
    ViewOrganization,

    // Users
    InviteUser,
    ManageUsers,

    // Courses
    CreateCourse,
    UpdateCourse,
    PublishCourse,
    ViewCourse,

    // Lessons & quizzes
    ManageLessons,
    GradeQuiz,
    SubmitQuiz,

    // Enrollment
    Enroll,
    ViewProgress,

    // Gamification
    AwardBadge,

    // Governance
    QueryAuditLog,
    PurgeAuditLog,
    ManageCache,
}

impl Action {
    /// Minimum role in the permission matrix
    pub fn min_role(&self) -> Role {
        use Action::*;
        match self {
            CreateOrganization | PurgeAuditLog => Role::SuperAdmin,
            UpdateOrganization | InviteUser | ManageUsers | QueryAuditLog | ManageCache => {
                Role::OrgAdmin
            }
            CreateCourse | UpdateCourse | PublishCourse | ManageLessons | GradeQuiz | AwardBadge => {
                Role::Mentor
            }
            ViewOrganization | ViewCourse | SubmitQuiz | Enroll | ViewProgress => Role::Learner,
        }
    }

    /// Name used in audit records
    pub fn as_str(&self) -> &'static str {
        use Action::*;
        match self {
            CreateOrganization => "organization.create",
            UpdateOrganization => "organization.update",
            ViewOrganization => "organization.view",
            InviteUser => "user.invite",
            ManageUsers => "user.manage",
            CreateCourse => "course.create",
            UpdateCourse => "course.update",
            PublishCourse => "course.publish",
            ViewCourse => "course.view",
            ManageLessons => "lesson.manage",
            GradeQuiz => "quiz.grade",
            SubmitQuiz => "quiz.submit",
            Enroll => "enrollment.create",
            ViewProgress => "progress.view",
            AwardBadge => "badge.award",
            QueryAuditLog => "audit.query",
            PurgeAuditLog => "audit.purge",
            ManageCache => "cache.manage",
        }
    }
}

/// Access decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Pure policy check, no side effects
pub fn evaluate(principal: &Principal, action: Action, target: &OrganizationId) -> Decision {
    if principal.is_super_admin() {
        return Decision::Allow;
    }

    let Some(own) = principal.organization_id.as_ref() else {
        return Decision::Deny(DenyReason::NoTenant);
    };

    if own != target {
        return Decision::Deny(DenyReason::TenantMismatch);
    }

    if !principal.role.meets(action.min_role()) {
        return Decision::Deny(DenyReason::InsufficientRole);
    }

    Decision::Allow
}

/// Access governor - audits every denial before returning it
pub struct AccessGovernor {
    audit: Arc<AuditLog>,
}

impl AccessGovernor {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self { audit }
    }

    pub async fn authorize(&self, principal: &Principal, action: Action, target: &OrganizationId) -> Decision {
        self.authorize_from(principal, action, target, &ClientInfo::default())
            .await
    }

    /// Authorize, attributing any denial record to the given client
    pub async fn authorize_from(
        &self,
        principal: &Principal,
        action: Action,
        target: &OrganizationId,
        client: &ClientInfo,
    ) -> Decision {
        let decision = evaluate(principal, action, target);

        match decision {
            Decision::Allow => {
                debug!(subject_id = %principal.subject_id, action = action.as_str(), target = %target, "Access allowed");
            }
            Decision::Deny(reason) => {
                warn!(
                    subject_id = %principal.subject_id,
                    role = %principal.role,
                    action = action.as_str(),
                    target = %target,
                    reason = reason.code(),
                    "Access denied"
                );
                self.audit
                    .record_denial(
                        AuditEvent::new(action.as_str(), "authorization", AuditOutcome::Failure)
                            .by(principal)
                            .client(client.clone())
                            .details(serde_json::json!({
                                "reason": reason.code(),
                                "role": principal.role,
                                "target_organization_id": target,
                            })),
                    )
                    .await;
            }
        }

        decision
    }

    /// Authorize and convert a denial into an error
    pub async fn enforce(
        &self,
        principal: &Principal,
        action: Action,
        target: &OrganizationId,
        client: &ClientInfo,
    ) -> GovernanceResult<()> {
        match self.authorize_from(principal, action, target, client).await {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(GovernanceError::Authorization(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditQuery;
    use crate::config::AuditConfig;
    use crate::store::InMemoryStore;

    fn org(id: &str) -> OrganizationId {
        OrganizationId::parse(id).unwrap()
    }

    fn governor() -> (Arc<InMemoryStore>, Arc<AuditLog>, AccessGovernor) {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(AuditLog::new(store.clone(), AuditConfig::default()));
        (store, audit.clone(), AccessGovernor::new(audit))
    }

    #[test]
    fn test_permission_matrix() {
        let learner = Principal::for_tests("l", Some("a"), Role::Learner);
        let mentor = Principal::for_tests("m", Some("a"), Role::Mentor);
        let admin = Principal::for_tests("o", Some("a"), Role::OrgAdmin);

        assert!(evaluate(&learner, Action::Enroll, &org("a")).is_allowed());
        assert_eq!(
            evaluate(&learner, Action::CreateCourse, &org("a")),
            Decision::Deny(DenyReason::InsufficientRole)
        );
        assert!(evaluate(&mentor, Action::CreateCourse, &org("a")).is_allowed());
        assert!(!evaluate(&mentor, Action::InviteUser, &org("a")).is_allowed());
        assert!(evaluate(&admin, Action::InviteUser, &org("a")).is_allowed());
        assert!(!evaluate(&admin, Action::CreateOrganization, &org("a")).is_allowed());
    }

    #[test]
    fn test_super_admin_always_allowed() {
        let root = Principal::for_tests("root", None, Role::SuperAdmin);
        assert!(evaluate(&root, Action::CreateOrganization, &org("new")).is_allowed());
        assert!(evaluate(&root, Action::ViewCourse, &org("any")).is_allowed());
    }

    #[test]
    fn test_null_tenant_denied() {
        let broken = Principal::for_tests("x", None, Role::OrgAdmin);
        assert_eq!(
            evaluate(&broken, Action::ViewCourse, &org("a")),
            Decision::Deny(DenyReason::NoTenant)
        );
    }

    #[tokio::test]
    async fn test_cross_tenant_denial_is_audited() {
        let (store, audit, governor) = governor();
        let admin_a = Principal::for_tests("admin-a", Some("a"), Role::OrgAdmin);

        let decision = governor.authorize(&admin_a, Action::InviteUser, &org("b")).await;
        assert_eq!(decision, Decision::Deny(DenyReason::TenantMismatch));
        assert_eq!(store.audit_len(), 1);

        let root = Principal::for_tests("root", None, Role::SuperAdmin);
        let page = audit.query(&root, AuditQuery::for_org(org("a"))).await.unwrap();
        assert_eq!(page.total, 1);
        let record = &page.records[0];
        assert_eq!(record.organization_id, Some(org("a")));
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.action, "user.invite");
        assert_eq!(record.details["reason"], "tenant-mismatch");
    }

    #[tokio::test]
    async fn test_allow_writes_nothing() {
        let (store, _, governor) = governor();
        let mentor = Principal::for_tests("m", Some("a"), Role::Mentor);

        assert!(governor.authorize(&mentor, Action::GradeQuiz, &org("a")).await.is_allowed());
        assert_eq!(store.audit_len(), 0);
    }

    #[tokio::test]
    async fn test_enforce_maps_to_error() {
        let (_, _, governor) = governor();
        let learner = Principal::for_tests("l", Some("a"), Role::Learner);

        let result = governor
            .enforce(&learner, Action::PublishCourse, &org("a"), &ClientInfo::default())
            .await;
        assert_eq!(
            result,
            Err(GovernanceError::Authorization(DenyReason::InsufficientRole))
        );
    }
}
