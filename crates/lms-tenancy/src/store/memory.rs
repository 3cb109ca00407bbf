//! In-memory store (for testing and single-node deployments)

use super::{
    AuditStore, CacheEntry, CacheStore, RateWindow, RateWindowStore, StoreError, StoreResult,
};
use crate::audit::{AuditPage, AuditQuery, AuditRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory implementation of every storage collaborator
pub struct InMemoryStore {
    entries: DashMap<String, CacheEntry>,
    windows: DashMap<String, RateWindow>,
    records: RwLock<Vec<AuditRecord>>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            windows: DashMap::new(),
            records: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a backend outage; every call fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn cache_len(&self) -> usize {
        self.entries.len()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn audit_len(&self) -> usize {
        self.records.read().len()
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store offline".into()))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        self.ensure_available()?;
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn put(&self, entry: CacheEntry) -> StoreResult<()> {
        self.ensure_available()?;
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        self.ensure_available()?;
        Ok(self.entries.remove(key).is_some())
    }

    async fn remove_prefix(&self, prefix: &str) -> StoreResult<usize> {
        self.ensure_available()?;
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = !key.starts_with(prefix);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.ensure_available()?;
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

#[async_trait]
impl RateWindowStore for InMemoryStore {
    async fn increment(
        &self,
        subject_key: &str,
        window_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<RateWindow> {
        self.ensure_available()?;

        // The entry guard holds the shard lock for the whole reset-increment-compare.
        let mut window = self
            .windows
            .entry(subject_key.to_string())
            .or_insert_with(|| RateWindow::open(subject_key, window_id, window_start, window_end, limit));

        // Only a newer window resets. A late caller that sampled the clock
        // before the current window opened is counted against the current one.
        if window_id > window.window_id {
            *window = RateWindow::open(subject_key, window_id, window_start, window_end, limit);
        }

        window.count = window.count.saturating_add(1);
        window.limit = limit;
        if window.count > limit {
            window.blocked_until = Some(window.window_end);
        }

        Ok(window.value().clone())
    }

    async fn purge_stale(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.ensure_available()?;
        let mut removed = 0;
        self.windows.retain(|_, window| {
            let keep = window.window_end > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append(&self, record: AuditRecord) -> StoreResult<()> {
        self.ensure_available()?;
        self.records.write().push(record);
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> StoreResult<AuditPage> {
        self.ensure_available()?;

        let mut matched: Vec<AuditRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matched.len() as u64;
        let per_page = query.per_page.max(1);
        let page = query.page.max(1);
        let offset = ((page - 1) as usize).saturating_mul(per_page as usize);

        let records = matched
            .into_iter()
            .skip(offset)
            .take(per_page as usize)
            .collect();

        Ok(AuditPage {
            records,
            total,
            page,
            per_page,
        })
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.ensure_available()?;
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now, now + Duration::seconds(60))
    }

    #[tokio::test]
    async fn test_increment_resets_on_new_window() {
        let store = InMemoryStore::new();
        let (start, end) = window_bounds(Utc::now());

        store.increment("a:u:e", 1, start, end, 2).await.unwrap();
        let second = store.increment("a:u:e", 1, start, end, 2).await.unwrap();
        let third = store.increment("a:u:e", 1, start, end, 2).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(third.count, 3);
        assert_eq!(third.blocked_until, Some(end));

        let fresh = store.increment("a:u:e", 2, end, end + Duration::seconds(60), 2).await.unwrap();
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.blocked_until, None);
    }

    #[tokio::test]
    async fn test_remove_prefix_counts() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for key in ["a:course:1", "a:course:2", "a:lesson:1", "b:course:1"] {
            store
                .put(CacheEntry {
                    key: key.into(),
                    payload: crate::cache::Payload::from_bytes(b"x".to_vec()),
                    created_at: now,
                    expires_at: now + Duration::seconds(60),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.remove_prefix("a:course:").await.unwrap(), 2);
        assert_eq!(store.cache_len(), 2);
        assert!(store.get("b:course:1").await.unwrap().is_some());
    }

    #[test]
    fn test_audit_paging_and_purge() {
        use crate::audit::{AuditEvent, AuditOutcome};
        use crate::principal::OrganizationId;

        let store = InMemoryStore::new();
        let acme = OrganizationId::parse("acme").unwrap();
        let base = Utc::now() - Duration::days(10);

        tokio_test::block_on(async {
            for day in 0..5 {
                let mut record = AuditEvent::new("course.view", "course", AuditOutcome::Success)
                    .subject(format!("user-{day}"), Some(acme.clone()))
                    .into_record();
                record.timestamp = base + Duration::days(day);
                store.append(record).await.unwrap();
            }
            let other = AuditEvent::new("course.view", "course", AuditOutcome::Success)
                .subject("intruder", Some(OrganizationId::parse("other").unwrap()))
                .into_record();
            store.append(other).await.unwrap();

            let mut query = AuditQuery::for_org(acme.clone());
            query.per_page = 2;
            query.page = 2;
            let page = store.query(&query).await.unwrap();
            assert_eq!(page.total, 5);
            assert_eq!(page.records.len(), 2);
            assert_eq!(page.records[0].subject_id, "user-2");
            assert_eq!(page.records[1].subject_id, "user-1");

            let removed = store.purge_before(base + Duration::days(2)).await.unwrap();
            assert_eq!(removed, 2);
            assert_eq!(store.audit_len(), 4);
        });
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryStore::new();
        store.set_available(false);

        assert!(matches!(store.get("k").await, Err(StoreError::Unavailable(_))));
        assert!(store.purge_stale(Utc::now()).await.is_err());

        store.set_available(true);
        assert!(store.get("k").await.unwrap().is_none());
    }
}
