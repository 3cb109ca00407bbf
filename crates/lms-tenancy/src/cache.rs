//! Organization-scoped read-through cache
//!
//! Keys are always `{organizationId}:{resourceType}:{resourceId}`. Segments
//! containing the delimiter are rejected, so no two tenants can ever build
//! the same key. The cache is an accelerator only: a backend failure turns
//! into a miss and the caller falls through to the authoritative path.

use crate::config::CacheConfig;
use crate::error::{GovernanceError, GovernanceResult};
use crate::principal::OrganizationId;
use crate::store::{CacheEntry, CacheStore};
use crate::KEY_DELIMITER;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Opaque serialized value. Shape validation belongs to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Serialize a value as JSON
    pub fn from_json<T: Serialize>(value: &T) -> GovernanceResult<Self> {
        serde_json::to_vec(value)
            .map(Self)
            .map_err(|e| GovernanceError::Validation(format!("unserializable payload: {e}")))
    }

    /// Deserialize JSON back into a value
    pub fn decode<T: DeserializeOwned>(&self) -> GovernanceResult<T> {
        serde_json::from_slice(&self.0)
            .map_err(|e| GovernanceError::Validation(format!("undecodable payload: {e}")))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Validated cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(org: &OrganizationId, resource_type: &str, resource_id: &str) -> GovernanceResult<Self> {
        validate_segment("resource type", resource_type)?;
        validate_segment("resource id", resource_id)?;
        Ok(Self(format!(
            "{org}{d}{resource_type}{d}{resource_id}",
            d = KEY_DELIMITER
        )))
    }

    /// Prefix covering every id of one resource type in one organization
    pub fn type_prefix(org: &OrganizationId, resource_type: &str) -> GovernanceResult<String> {
        validate_segment("resource type", resource_type)?;
        Ok(format!("{org}{d}{resource_type}{d}", d = KEY_DELIMITER))
    }

    /// Prefix covering every key of one organization
    pub fn org_prefix(org: &OrganizationId) -> String {
        format!("{org}{KEY_DELIMITER}")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn validate_segment(name: &str, value: &str) -> GovernanceResult<()> {
    if value.is_empty() {
        return Err(GovernanceError::Validation(format!("{name} is empty")));
    }
    if value.contains(KEY_DELIMITER) {
        return Err(GovernanceError::Validation(format!(
            "{name} must not contain '{KEY_DELIMITER}'"
        )));
    }
    Ok(())
}

/// What a mutation invalidates
#[derive(Debug, Clone, Copy)]
pub enum Invalidate<'a> {
    /// One resource
    Key(&'a str),
    /// Every cached resource of the type, including list views
    ResourceType,
}

/// Scoped cache over an injected store
pub struct ScopedCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl ScopedCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl()
    }

    /// Look up a value; expired entries are removed and reported as a miss
    pub async fn get(
        &self,
        org: &OrganizationId,
        resource_type: &str,
        resource_id: &str,
    ) -> GovernanceResult<Option<Payload>> {
        let key = CacheKey::new(org, resource_type, resource_id)?;

        let entry = match self.store.get(key.as_str()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return Ok(None);
            }
        };

        if entry.key != key.as_str() {
            warn!(key = %key, stored = %entry.key, "Cache returned foreign key, ignoring");
            return Ok(None);
        }

        if entry.is_expired(Utc::now()) {
            debug!(key = %key, "Cache entry expired");
            if let Err(e) = self.store.remove(key.as_str()).await {
                warn!(key = %key, error = %e, "Failed to drop expired cache entry");
            }
            return Ok(None);
        }

        Ok(Some(entry.payload))
    }

    /// Store a value, overwriting any previous one
    pub async fn set(
        &self,
        org: &OrganizationId,
        resource_type: &str,
        resource_id: &str,
        value: Payload,
        ttl: Duration,
    ) -> GovernanceResult<()> {
        let key = CacheKey::new(org, resource_type, resource_id)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| GovernanceError::Validation("ttl out of range".into()))?;
        let now = Utc::now();

        let entry = CacheEntry {
            key: key.to_string(),
            payload: value,
            created_at: now,
            expires_at: now + ttl,
        };

        if let Err(e) = self.store.put(entry).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
        Ok(())
    }

    /// Remove one entry. Idempotent.
    pub async fn delete(
        &self,
        org: &OrganizationId,
        resource_type: &str,
        resource_id: &str,
    ) -> GovernanceResult<()> {
        let key = CacheKey::new(org, resource_type, resource_id)?;
        if let Err(e) = self.store.remove(key.as_str()).await {
            error!(key = %key, error = %e, "Cache invalidation failed");
        }
        Ok(())
    }

    /// Remove every entry of a resource type within one organization
    pub async fn invalidate_prefix(
        &self,
        org: &OrganizationId,
        resource_type: &str,
    ) -> GovernanceResult<usize> {
        let prefix = CacheKey::type_prefix(org, resource_type)?;
        Ok(self.remove_prefix(&prefix).await)
    }

    /// Remove every entry of one organization
    pub async fn invalidate_org(&self, org: &OrganizationId) -> usize {
        self.remove_prefix(&CacheKey::org_prefix(org)).await
    }

    async fn remove_prefix(&self, prefix: &str) -> usize {
        match self.store.remove_prefix(prefix).await {
            Ok(removed) => {
                debug!(prefix, removed, "Cache prefix invalidated");
                removed
            }
            Err(e) => {
                error!(prefix, error = %e, "Cache prefix invalidation failed");
                0
            }
        }
    }

    /// Read through the cache, falling back to `fetch` on miss or outage
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        org: &OrganizationId,
        resource_type: &str,
        resource_id: &str,
        ttl: Duration,
        fetch: F,
    ) -> GovernanceResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GovernanceResult<T>>,
    {
        if let Some(payload) = self.get(org, resource_type, resource_id).await? {
            match payload.decode::<T>() {
                Ok(value) => return Ok(value),
                Err(e) => warn!(org = %org, resource_type, resource_id, error = %e, "Stale cache shape, refetching"),
            }
        }

        let value = fetch().await?;
        match Payload::from_json(&value) {
            Ok(payload) => self.set(org, resource_type, resource_id, payload, ttl).await?,
            Err(e) => warn!(org = %org, resource_type, error = %e, "Value not cacheable"),
        }
        Ok(value)
    }

    /// Run a mutation and synchronously invalidate what it touched.
    ///
    /// Invalidation runs whether or not the write succeeded, since a failed
    /// write may still have partially applied.
    pub async fn write_through<T, F, Fut>(
        &self,
        org: &OrganizationId,
        resource_type: &str,
        scope: Invalidate<'_>,
        write: F,
    ) -> GovernanceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GovernanceResult<T>>,
    {
        // Validate before mutating so a bad key can't skip invalidation.
        match scope {
            Invalidate::Key(id) => {
                CacheKey::new(org, resource_type, id)?;
            }
            Invalidate::ResourceType => {
                CacheKey::type_prefix(org, resource_type)?;
            }
        }

        let result = write().await;

        match scope {
            Invalidate::Key(id) => self.delete(org, resource_type, id).await?,
            Invalidate::ResourceType => {
                self.invalidate_prefix(org, resource_type).await?;
            }
        }

        result
    }

    /// Purge expired entries (maintenance)
    pub async fn sweep_expired(&self) -> usize {
        match self.store.purge_expired(Utc::now()).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Cache sweep failed");
                0
            }
        }
    }
}
