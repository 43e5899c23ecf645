//! The cache tier capability surface and its in-memory reference impl.
//!
//! Per §1, the cache backend itself is an external collaborator "specified
//! only by interface" -- this module defines the narrow [`Cache`] trait
//! (§6: `get`/`set`/`delete` over `record = { _v, _d }`) plus a
//! [`InMemoryCache`] good enough to drive the core's own tests and to
//! serve as the default backend when nothing richer is wired in.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use topgun_core::CacheRecord;

/// The fast cache tier. Always consulted first on reads (§4.3) and
/// written first on every accepted step (§4.5 step 4).
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<Option<CacheRecord>>;
    async fn set(&self, name: &str, record: CacheRecord) -> anyhow::Result<()>;
    async fn delete(&self, name: &str) -> anyhow::Result<()>;
}

/// `DashMap`-backed cache, sharded by record name like the rest of this
/// workspace's concurrent in-memory stores.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CacheRecord>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, name: &str) -> anyhow::Result<Option<CacheRecord>> {
        Ok(self.entries.get(name).map(|entry| entry.value().clone()))
    }

    async fn set(&self, name: &str, record: CacheRecord) -> anyhow::Result<()> {
        self.entries.insert(name.to_string(), record);
        Ok(())
    }

    async fn delete(&self, name: &str) -> anyhow::Result<()> {
        self.entries.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = InMemoryCache::new();
        assert!(cache.get("a/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = InMemoryCache::new();
        cache
            .set(
                "a/1",
                CacheRecord {
                    version: 3,
                    data: json!({"x": 1}),
                },
            )
            .await
            .unwrap();

        let record = cache.get("a/1").await.unwrap().unwrap();
        assert_eq!(record.version, 3);
        assert_eq!(record.data, json!({"x": 1}));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = InMemoryCache::new();
        cache
            .set("a/1", CacheRecord { version: 0, data: json!({}) })
            .await
            .unwrap();
        cache.delete("a/1").await.unwrap();
        assert!(cache.get("a/1").await.unwrap().is_none());
    }
}
