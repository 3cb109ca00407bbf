//! Append-only audit trail
//!
//! Records are immutable once written. The only deletion path is the
//! retention purge, which requires a system or SuperAdmin context. Queries
//! always carry a scope: one organization, gated by the same role matrix as
//! every other action, or the platform-level records that belong to no
//! organization (auth failures, retention purges), readable by SuperAdmin
//! only.

use crate::access::{self, Action, Decision};
use crate::config::AuditConfig;
use crate::error::{DenyReason, GovernanceError, GovernanceResult};
use crate::principal::{OrganizationId, Principal};
use crate::store::AuditStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    Error,
}

/// Persisted audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "userId")]
    pub subject_id: String,
    pub organization_id: Option<OrganizationId>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: serde_json::Value,
    #[serde(rename = "ipAddress")]
    pub client_ip: Option<String>,
    #[serde(rename = "userAgent")]
    pub client_agent: Option<String>,
    pub outcome: AuditOutcome,
}

/// Caller network metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub agent: Option<String>,
}

/// Event to be recorded; id and timestamp are assigned on write
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub subject_id: String,
    pub organization_id: Option<OrganizationId>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub details: serde_json::Value,
    pub client: ClientInfo,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            subject_id: String::new(),
            organization_id: None,
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            outcome,
            details: serde_json::Value::Null,
            client: ClientInfo::default(),
        }
    }

    /// Attribute to a principal and its tenant
    pub fn by(mut self, principal: &Principal) -> Self {
        self.subject_id = principal.subject_id.clone();
        self.organization_id = principal.tenant().cloned();
        self
    }

    pub fn subject(mut self, subject_id: impl Into<String>, org: Option<OrganizationId>) -> Self {
        self.subject_id = subject_id.into();
        self.organization_id = org;
        self
    }

    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    pub(crate) fn into_record(self) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            subject_id: self.subject_id,
            organization_id: self.organization_id,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            details: self.details,
            client_ip: self.client.ip,
            client_agent: self.client.agent,
            outcome: self.outcome,
        }
    }
}

/// Which records a query may see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditScope {
    /// Records attributed to one organization
    Organization(OrganizationId),
    /// Records attributed to no organization
    Platform,
}

impl AuditScope {
    pub fn organization(&self) -> Option<&OrganizationId> {
        match self {
            AuditScope::Organization(org) => Some(org),
            AuditScope::Platform => None,
        }
    }
}

/// Audit query; the scope is mandatory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub scope: AuditScope,
    pub subject_id: Option<String>,
    pub action: Option<String>,
    pub outcome: Option<AuditOutcome>,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub to: Option<DateTime<Utc>>,
    /// 1-based
    pub page: u32,
    pub per_page: u32,
}

impl AuditQuery {
    pub fn for_org(organization_id: OrganizationId) -> Self {
        Self::scoped(AuditScope::Organization(organization_id))
    }

    /// Platform-level records (SuperAdmin only)
    pub fn platform() -> Self {
        Self::scoped(AuditScope::Platform)
    }

    fn scoped(scope: AuditScope) -> Self {
        Self {
            scope,
            subject_id: None,
            action: None,
            outcome: None,
            from: None,
            to: None,
            page: 1,
            per_page: 50,
        }
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        record.organization_id.as_ref() == self.scope.organization()
            && self.subject_id.as_ref().map_or(true, |s| *s == record.subject_id)
            && self.action.as_ref().map_or(true, |a| *a == record.action)
            && self.outcome.map_or(true, |o| o == record.outcome)
            && self.from.map_or(true, |from| record.timestamp >= from)
            && self.to.map_or(true, |to| record.timestamp < to)
    }
}

/// One page of results, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
    pub records: Vec<AuditRecord>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// Who is running a privileged operation
#[derive(Debug, Clone)]
pub enum ExecutionContext {
    /// Scheduled maintenance
    System,
    Principal(Principal),
}

/// Audit log over an injected append-only store
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    config: AuditConfig,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>, config: AuditConfig) -> Self {
        Self { store, config }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.config.retention_days) * 86_400)
    }

    /// Record an event. Storage failures are logged, never returned.
    pub async fn record(&self, event: AuditEvent) {
        self.append(event, 1).await;
    }

    /// Record an authorization denial, retrying once on storage failure
    pub async fn record_denial(&self, event: AuditEvent) {
        self.append(event, 2).await;
    }

    async fn append(&self, event: AuditEvent, attempts: u32) {
        let record = event.into_record();
        for attempt in 1..=attempts {
            match self.store.append(record.clone()).await {
                Ok(()) => {
                    debug!(id = %record.id, action = %record.action, outcome = ?record.outcome, "Audit record written");
                    return;
                }
                Err(e) if attempt < attempts => {
                    warn!(id = %record.id, action = %record.action, attempt, error = %e, "Audit write failed, retrying");
                }
                Err(e) => {
                    error!(
                        id = %record.id,
                        action = %record.action,
                        subject_id = %record.subject_id,
                        error = %e,
                        "Audit write failed, record dropped"
                    );
                }
            }
        }
    }

    /// Query records within one scope.
    ///
    /// SuperAdmin may query any organization and the platform scope, OrgAdmin
    /// only their own organization, and every other role is denied. Denied
    /// queries are themselves audited.
    pub async fn query(&self, principal: &Principal, mut query: AuditQuery) -> GovernanceResult<AuditPage> {
        let decision = match &query.scope {
            AuditScope::Organization(org) => access::evaluate(principal, Action::QueryAuditLog, org),
            AuditScope::Platform if principal.is_super_admin() => Decision::Allow,
            AuditScope::Platform => Decision::Deny(DenyReason::InsufficientRole),
        };

        if let Decision::Deny(reason) = decision {
            self.record_denial(
                AuditEvent::new(Action::QueryAuditLog.as_str(), "audit_log", AuditOutcome::Failure)
                    .by(principal)
                    .details(serde_json::json!({
                        "reason": reason.code(),
                        "target_organization_id": query.scope.organization(),
                    })),
            )
            .await;
            return Err(GovernanceError::Authorization(reason));
        }

        query.page = query.page.max(1);
        query.per_page = query.per_page.clamp(1, self.config.max_page_size.max(1));

        Ok(self.store.query(&query).await?)
    }

    /// Delete records older than `age`. Restricted to system or SuperAdmin.
    pub async fn purge_older_than(
        &self,
        context: &ExecutionContext,
        age: Duration,
    ) -> GovernanceResult<usize> {
        let actor = match context {
            ExecutionContext::System => "system".to_string(),
            ExecutionContext::Principal(p) if p.is_super_admin() => p.subject_id.clone(),
            ExecutionContext::Principal(p) => {
                let reason = DenyReason::InsufficientRole;
                self.record_denial(
                    AuditEvent::new(Action::PurgeAuditLog.as_str(), "audit_log", AuditOutcome::Failure)
                        .by(p)
                        .details(serde_json::json!({ "reason": reason.code() })),
                )
                .await;
                return Err(GovernanceError::Authorization(reason));
            }
        };

        let age = chrono::Duration::from_std(age)
            .map_err(|_| GovernanceError::Validation("retention age out of range".into()))?;
        let cutoff = Utc::now() - age;
        let removed = self.store.purge_before(cutoff).await?;

        info!(actor = %actor, removed, cutoff = %cutoff, "Audit retention purge");
        self.record(
            AuditEvent::new(Action::PurgeAuditLog.as_str(), "audit_log", AuditOutcome::Success)
                .subject(actor, None)
                .details(serde_json::json!({ "removed": removed, "cutoff": cutoff })),
        )
        .await;

        Ok(removed)
    }
}
