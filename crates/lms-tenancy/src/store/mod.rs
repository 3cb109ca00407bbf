//! Storage collaborators
//!
//! The governance layer never owns persistence. Cache entries, rate windows
//! and audit records live in a store shared by every tenant; isolation comes
//! from key construction and mandatory organization predicates, not from the
//! store itself.

mod memory;

pub use memory::InMemoryStore;

use crate::audit::{AuditPage, AuditQuery, AuditRecord};
use crate::cache::Payload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// One cached value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// `{organizationId}:{resourceType}:{resourceId}`
    pub key: String,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Counter state for one subject in one fixed window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub subject_key: String,
    /// `floor(now / window)`
    pub window_id: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub count: u32,
    pub limit: u32,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateWindow {
    pub fn open(
        subject_key: &str,
        window_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: u32,
    ) -> Self {
        Self {
            subject_key: subject_key.to_string(),
            window_id,
            window_start,
            window_end,
            count: 0,
            limit,
            blocked_until: None,
        }
    }
}

/// Backing store for the scoped cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

    /// Insert or overwrite (last write wins)
    async fn put(&self, entry: CacheEntry) -> StoreResult<()>;

    /// Returns whether an entry was removed
    async fn remove(&self, key: &str) -> StoreResult<bool>;

    /// Remove every key starting with `prefix`
    async fn remove_prefix(&self, prefix: &str) -> StoreResult<usize>;

    /// Remove entries whose expiry is at or before `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Backing store for fixed-window counters
#[async_trait]
pub trait RateWindowStore: Send + Sync {
    /// Atomically reset-or-increment the subject's counter and compare it
    /// against `limit`.
    ///
    /// If `window_id` is newer than the stored window the counter restarts
    /// at zero before the increment. An older `window_id` never rewinds the
    /// row; the increment lands on the stored window instead. When the
    /// post-increment count exceeds `limit`, `blocked_until` is set to the
    /// stored window's end. Implementations must perform the whole step as
    /// one conditional update or transaction.
    async fn increment(
        &self,
        subject_key: &str,
        window_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<RateWindow>;

    /// Drop windows that ended at or before `now`
    async fn purge_stale(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Append-only backing store for audit records
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: AuditRecord) -> StoreResult<()>;

    /// Filter by the query's predicates, newest first, one page
    async fn query(&self, query: &AuditQuery) -> StoreResult<AuditPage>;

    /// Delete records with `timestamp < cutoff`
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}
