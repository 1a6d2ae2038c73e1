//! In-process cache backed by a concurrent map.

use crate::component::{Cache, ComponentKind, ComponentSpec, FieldSpec, ParsedConfig};
use crate::errors::{CacheError, StreamflowError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CachedValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CachedValue {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// A cache kept in memory. Expired keys are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CachedValue>,
    default_ttl: Option<Duration>,
}

impl MemoryCache {
    /// Creates an empty cache whose keys never expire by default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TTL applied when a write does not give one.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Builds the cache from parsed settings.
    pub fn from_parsed(parsed: &ParsedConfig) -> Result<Self, StreamflowError> {
        let ttl = parsed.field_duration("default_ttl")?;
        Ok(if ttl.is_zero() {
            Self::new()
        } else {
            Self::new().with_default_ttl(ttl)
        })
    }

    /// The documentation of the `memory` cache.
    #[must_use]
    pub fn spec() -> ComponentSpec {
        ComponentSpec::new(ComponentKind::Cache, "memory")
            .summary("Stores key/value pairs in memory.")
            .field(
                FieldSpec::duration("default_ttl")
                    .description("How long keys live when a write gives no TTL. Empty means forever.")
                    .default(""),
            )
    }

    /// Returns the number of stored keys, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, value: Vec<u8>, ttl: Option<Duration>) -> CachedValue {
        CachedValue::new(value, ttl.or(self.default_ttl))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StreamflowError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, v| v.is_expired());
        Err(CacheError::not_found(key).into())
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StreamflowError> {
        self.entries.insert(key.to_string(), self.entry(value, ttl));
        Ok(())
    }

    async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StreamflowError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(existing) if !existing.get().is_expired() => {
                Err(CacheError::already_exists(key).into())
            }
            Entry::Occupied(mut existing) => {
                existing.insert(self.entry(value, ttl));
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(self.entry(value, ttl));
                Ok(())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StreamflowError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        assert!(matches!(
            cache.get("foo").await,
            Err(StreamflowError::Cache(CacheError::KeyNotFound { .. }))
        ));

        cache.set("foo", b"bar".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("foo").await.unwrap(), b"bar");

        cache.set("foo", b"baz".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("foo").await.unwrap(), b"baz");

        cache.delete("foo").await.unwrap();
        cache.delete("foo").await.unwrap();
        assert!(cache.get("foo").await.is_err());
    }

    #[tokio::test]
    async fn test_add_refuses_existing_key() {
        let cache = MemoryCache::new();
        cache.add("foo", b"1".to_vec(), None).await.unwrap();
        let err = cache.add("foo", b"2".to_vec(), None).await.unwrap_err();
        assert!(matches!(
            err,
            StreamflowError::Cache(CacheError::KeyAlreadyExists { .. })
        ));
        assert_eq!(cache.get("foo").await.unwrap(), b"1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire() {
        let cache = MemoryCache::new().with_default_ttl(Duration::from_secs(10));
        cache.set("short", b"a".to_vec(), Some(Duration::from_secs(1))).await.unwrap();
        cache.set("long", b"b".to_vec(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("short").await.is_err());
        assert_eq!(cache.get("long").await.unwrap(), b"b");
        assert_eq!(cache.len(), 1);

        cache.add("short", b"c".to_vec(), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        cache.add("long", b"d".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("long").await.unwrap(), b"d");
    }

    #[test]
    fn test_from_parsed() {
        let parsed = MemoryCache::spec().parse(&json!({ "default_ttl": "5m" })).unwrap();
        let cache = MemoryCache::from_parsed(&parsed).unwrap();
        assert_eq!(cache.default_ttl, Some(Duration::from_secs(300)));

        let parsed = MemoryCache::spec().parse(&json!({})).unwrap();
        assert_eq!(MemoryCache::from_parsed(&parsed).unwrap().default_ttl, None);
    }
}
