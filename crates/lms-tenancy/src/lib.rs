//! LMS Tenancy - Tenant Isolation & Resource Governance
//!
//! Every inbound request passes through the same five components before a
//! CRUD handler touches tenant data.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    TENANT ISOLATION & GOVERNANCE                        │
//! │                                                                         │
//! │   Bearer credential                                                     │
//! │          │                                                              │
//! │  ┌───────▼──────────┐     ┌──────────────────┐                          │
//! │  │  AuthContext     │────▶│  Access Governor │──── deny ───┐            │
//! │  │  Resolver        │     │  (role matrix)   │             │            │
//! │  └──────────────────┘     └────────┬─────────┘             │            │
//! │                                    │ allow                 │            │
//! │                           ┌────────▼─────────┐             │            │
//! │                           │   CRUD handler   │             │            │
//! │                           └──┬────────────┬──┘             │            │
//! │                              │            │                │            │
//! │                  ┌───────────▼──┐  ┌──────▼───────┐  ┌─────▼────────┐   │
//! │                  │ Scoped Cache │  │ Rate Limiter │  │  Audit Log   │   │
//! │                  │ org:type:id  │  │ fixed window │  │ append-only  │   │
//! │                  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘   │
//! │                         │                 │                 │           │
//! │  ┌──────────────────────▼─────────────────▼─────────────────▼────────┐  │
//! │  │              SHARED BACKING STORE (all tenants)                   │  │
//! │  │   cache entries | rate windows | audit records                    │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod access;
pub mod audit;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod guard;
pub mod maintenance;
pub mod principal;
pub mod ratelimit;
pub mod store;

use std::sync::Arc;

pub use access::{AccessGovernor, Action, Decision};
pub use audit::{AuditEvent, AuditLog, AuditOutcome, AuditPage, AuditQuery, AuditRecord, AuditScope};
pub use auth::{AuthContextResolver, TokenIssuer};
pub use cache::{Payload, ScopedCache};
pub use config::GovernanceConfig;
pub use error::{AuthenticationError, DenyReason, GovernanceError, GovernanceResult};
pub use principal::{OrganizationId, Principal, Role};
pub use ratelimit::{RateLimitDecision, RateLimiter, SubjectKey};
pub use store::{AuditStore, CacheStore, InMemoryStore, RateWindowStore};

/// Reserved separator between key segments.
pub const KEY_DELIMITER: char = ':';

/// Fully wired component set shared by request handlers.
#[derive(Clone)]
pub struct Governance {
    /// Credential verification
    pub resolver: Arc<AuthContextResolver>,
    /// Tenant boundary and role checks
    pub governor: Arc<AccessGovernor>,
    /// Organization-scoped cache
    pub cache: Arc<ScopedCache>,
    /// Per-subject throttle
    pub limiter: Arc<RateLimiter>,
    /// Audit trail
    pub audit: Arc<AuditLog>,
}

impl Governance {
    /// Wire every component against one backing store.
    pub fn with_store(config: &GovernanceConfig, store: Arc<InMemoryStore>) -> Self {
        Self::new(config, store.clone(), store.clone(), store)
    }

    /// Wire components against separate collaborators.
    pub fn new(
        config: &GovernanceConfig,
        cache_store: Arc<dyn CacheStore>,
        window_store: Arc<dyn RateWindowStore>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        let audit = Arc::new(AuditLog::new(audit_store, config.audit.clone()));
        Self {
            resolver: Arc::new(AuthContextResolver::new(config.auth.clone())),
            governor: Arc::new(AccessGovernor::new(audit.clone())),
            cache: Arc::new(ScopedCache::new(cache_store, config.cache.clone())),
            limiter: Arc::new(RateLimiter::new(window_store, config.rate_limit.clone())),
            audit,
        }
    }
}
