//! Fixed-window rate limiting
//!
//! Time is cut into non-overlapping windows, `window_id = floor(now / window)`.
//! Each check is one atomic reset-or-increment against the window store, so
//! concurrent callers can never both observe `limit - 1` and both be admitted.
//! When the store is unreachable the limiter fails open.

use crate::config::{EndpointPolicy, RateLimitConfig};
use crate::error::{GovernanceError, GovernanceResult};
use crate::principal::{OrganizationId, Principal};
use crate::store::RateWindowStore;
use crate::KEY_DELIMITER;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Scope segment for principals without an organization
pub const PLATFORM_SCOPE: &str = "_platform";

/// `{organizationId}:{identity}:{endpoint}` with identity and endpoint escaped
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectKey(String);

impl SubjectKey {
    pub fn new(org: &OrganizationId, identity: &str, endpoint: &str) -> Self {
        Self::build(org.as_str(), identity, endpoint)
    }

    /// Key for the principal's own tenant
    pub fn for_principal(principal: &Principal, endpoint: &str) -> Self {
        let scope = principal
            .tenant()
            .map(|o| o.as_str())
            .unwrap_or(PLATFORM_SCOPE);
        Self::build(scope, &principal.subject_id, endpoint)
    }

    fn build(scope: &str, identity: &str, endpoint: &str) -> Self {
        Self(format!(
            "{scope}{d}{}{d}{}",
            escape_segment(identity),
            escape_segment(endpoint),
            d = KEY_DELIMITER
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Percent-escape `%` and the delimiter so distinct inputs never share a key
fn escape_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            KEY_DELIMITER => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    out
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// End of the current window
    pub reset_at: DateTime<Utc>,
    /// Present only when throttled
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    /// Whole seconds until retry, rounded up and never zero
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let millis = d.as_millis() as u64;
            millis.div_ceil(1000).max(1)
        })
    }

    /// Response metadata; `Retry-After` only on throttled responses
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at.timestamp().to_string()),
        ];
        if let Some(secs) = self.retry_after_secs() {
            headers.push(("Retry-After", secs.to_string()));
        }
        headers
    }

    /// Turn a throttled decision into an error
    pub fn into_result(self) -> GovernanceResult<Self> {
        match self.retry_after_secs() {
            Some(retry_after_secs) if !self.allowed => {
                Err(GovernanceError::RateLimitExceeded { retry_after_secs })
            }
            _ => Ok(self),
        }
    }
}

/// Window boundaries for an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowBounds {
    id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl WindowBounds {
    fn at(now: DateTime<Utc>, window: Duration) -> Self {
        let window_ms = (window.as_millis() as i64).max(1);
        let id = now.timestamp_millis().div_euclid(window_ms);
        let start_ms = id * window_ms;
        Self {
            id,
            start: from_millis(start_ms, now),
            end: from_millis(start_ms + window_ms, now),
        }
    }
}

fn from_millis(ms: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or(fallback)
}

/// Per-subject throttle
pub struct RateLimiter {
    store: Arc<dyn RateWindowStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateWindowStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn policy_for(&self, endpoint: &str) -> EndpointPolicy {
        self.config.policy_for(endpoint)
    }

    /// Check using the configured policy for `endpoint`
    pub async fn check_policy(&self, subject: &SubjectKey, endpoint: &str) -> RateLimitDecision {
        let policy = self.policy_for(endpoint);
        self.check(subject, policy.limit, policy.window()).await
    }

    pub async fn check(&self, subject: &SubjectKey, limit: u32, window: Duration) -> RateLimitDecision {
        self.check_at(subject, limit, window, Utc::now()).await
    }

    /// Check as of `now`
    pub async fn check_at(
        &self,
        subject: &SubjectKey,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let bounds = WindowBounds::at(now, window);

        let state = match self
            .store
            .increment(subject.as_str(), bounds.id, bounds.start, bounds.end, limit)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                warn!(subject = %subject, error = %e, "Rate window store unreachable, failing open");
                return RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_at: bounds.end,
                    retry_after: None,
                };
            }
        };

        let allowed = state.count <= limit;
        let reset_at = state.blocked_until.unwrap_or(state.window_end);
        let retry_after = if allowed {
            None
        } else {
            Some((reset_at - now).to_std().unwrap_or(Duration::ZERO))
        };

        if !allowed {
            debug!(subject = %subject, count = state.count, limit, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(state.count),
            reset_at,
            retry_after,
        }
    }

    /// Drop windows that have ended (maintenance)
    pub async fn purge_stale(&self) -> usize {
        match self.store.purge_stale(Utc::now()).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Rate window purge failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn limiter() -> (Arc<InMemoryStore>, Arc<RateLimiter>) {
        let store = Arc::new(InMemoryStore::new());
        let limiter = Arc::new(RateLimiter::new(store.clone(), RateLimitConfig::default()));
        (store, limiter)
    }

    fn subject() -> SubjectKey {
        SubjectKey::new(&OrganizationId::parse("acme").unwrap(), "user-1", "quiz.submit")
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_subject_key_escapes_delimiter() {
        let org = OrganizationId::parse("acme").unwrap();
        let a = SubjectKey::new(&org, "a:b", "c");
        let b = SubjectKey::new(&org, "a", "b:c");

        assert_ne!(a, b);
        assert_eq!(a.as_str(), "acme:a%3Ab:c");
        assert_eq!(SubjectKey::new(&org, "100%", "x").as_str(), "acme:100%25:x");
    }

    #[test]
    fn test_window_boundary_belongs_to_new_window() {
        let window = Duration::from_secs(60);
        let before = WindowBounds::at(at(59_999), window);
        let boundary = WindowBounds::at(at(60_000), window);

        assert_eq!(before.id, 0);
        assert_eq!(boundary.id, 1);
        assert_eq!(boundary.start, at(60_000));
        assert_eq!(boundary.end, at(120_000));
    }

    #[tokio::test]
    async fn test_fixed_window_sequence() {
        let (_, limiter) = limiter();
        let window = Duration::from_secs(60);
        let start = 1_700_000_040_000; // window-aligned
        let subject = subject();

        for i in 0..5 {
            let decision = limiter.check_at(&subject, 5, window, at(start + i * 1000)).await;
            assert!(decision.allowed, "request {i} should be admitted");
            assert_eq!(decision.remaining, 4 - i as u32);
        }

        let sixth = limiter.check_at(&subject, 5, window, at(start + 10_000)).await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
        assert_eq!(sixth.reset_at, at(start + 60_000));
        assert_eq!(sixth.retry_after, Some(Duration::from_secs(50)));

        let retried = limiter.check_at(&subject, 5, window, at(start + 60_000)).await;
        assert!(retried.allowed);
        assert_eq!(retried.remaining, 4);
    }

    #[tokio::test]
    async fn test_late_request_never_rewinds_window() {
        let (store, limiter) = limiter();
        let window = Duration::from_secs(60);
        let subject = subject();
        let mut admitted = 0;

        for _ in 0..3 {
            if limiter.check_at(&subject, 3, window, at(60_500)).await.allowed {
                admitted += 1;
            }
        }

        // Clock read just before the boundary, increment landing after it
        let late = limiter.check_at(&subject, 3, window, at(59_999)).await;
        assert!(!late.allowed);
        assert_eq!(late.reset_at, at(120_000));

        for _ in 0..3 {
            if limiter.check_at(&subject, 3, window, at(60_600)).await.allowed {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        assert_eq!(store.window_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_checks_admit_exactly_limit() {
        let (_, limiter) = limiter();
        let now = Utc::now();
        let subject = subject();

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let limiter = limiter.clone();
                let subject = subject.clone();
                tokio::spawn(async move {
                    limiter
                        .check_at(&subject, 10, Duration::from_secs(3600), now)
                        .await
                        .allowed
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let (store, limiter) = limiter();
        store.set_available(false);

        for _ in 0..3 {
            let decision = limiter.check(&subject(), 1, Duration::from_secs(60)).await;
            assert!(decision.allowed);
        }
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let (_, limiter) = limiter();
        let org_a = OrganizationId::parse("a").unwrap();
        let org_b = OrganizationId::parse("b").unwrap();
        let window = Duration::from_secs(60);

        let a = SubjectKey::new(&org_a, "u", "e");
        assert!(limiter.check(&a, 1, window).await.allowed);
        assert!(!limiter.check(&a, 1, window).await.allowed);

        let b = SubjectKey::new(&org_b, "u", "e");
        assert!(limiter.check(&b, 1, window).await.allowed);
    }

    #[test]
    fn test_headers() {
        let admitted = RateLimitDecision {
            allowed: true,
            limit: 5,
            remaining: 3,
            reset_at: at(60_000),
            retry_after: None,
        };
        let headers = admitted.headers();
        assert_eq!(headers.len(), 3);
        assert!(headers.contains(&("X-RateLimit-Reset", "60".to_string())));

        let throttled = RateLimitDecision {
            allowed: false,
            remaining: 0,
            retry_after: Some(Duration::from_millis(1500)),
            ..admitted
        };
        assert!(throttled.headers().contains(&("Retry-After", "2".to_string())));
        assert!(matches!(
            throttled.into_result(),
            Err(GovernanceError::RateLimitExceeded { retry_after_secs: 2 })
        ));
    }

    #[tokio::test]
    async fn test_purge_stale_windows() {
        let (store, limiter) = limiter();
        limiter
            .check_at(&subject(), 5, Duration::from_secs(60), at(1_000))
            .await;
        assert_eq!(store.window_count(), 1);

        assert_eq!(limiter.purge_stale().await, 1);
        assert_eq!(store.window_count(), 0);
    }
}
