//! The durable-storage tier capability surface and reference impls.
//!
//! Same shape as [`Cache`](super::cache::Cache) per §6, but a distinct
//! trait: the Storage Facade must never confuse the two tiers, and a
//! production deployment plugs in a genuinely different backend here
//! (the spec treats both as external collaborators -- see §1).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use topgun_core::CacheRecord;

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<Option<CacheRecord>>;
    async fn set(&self, name: &str, record: CacheRecord) -> anyhow::Result<()>;
    async fn delete(&self, name: &str) -> anyhow::Result<()>;
}

/// No-op durable store: every write succeeds immediately without
/// persisting anything, every read misses. Mirrors `NullDataStore`
/// upstream -- the default when no real persistence backend is configured.
#[derive(Default)]
pub struct NullDurableStore;

#[async_trait]
impl DurableStore for NullDurableStore {
    async fn get(&self, _name: &str) -> anyhow::Result<Option<CacheRecord>> {
        Ok(None)
    }

    async fn set(&self, _name: &str, _record: CacheRecord) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// `DashMap`-backed durable store for tests and single-process deployments
/// that want survival across a cache eviction without a real backend.
#[derive(Default)]
pub struct InMemoryDurableStore {
    entries: DashMap<String, CacheRecord>,
}

impl InMemoryDurableStore {
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
impl DurableStore for InMemoryDurableStore {
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
    async fn null_store_discards_writes() {
        let store = NullDurableStore;
        store
            .set("a/1", CacheRecord { version: 0, data: json!({}) })
            .await
            .unwrap();
        assert!(store.get("a/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryDurableStore::new();
        store
            .set("a/1", CacheRecord { version: 2, data: json!({"y": 2}) })
            .await
            .unwrap();
        let got = store.get("a/1").await.unwrap().unwrap();
        assert_eq!(got.version, 2);
    }
}
