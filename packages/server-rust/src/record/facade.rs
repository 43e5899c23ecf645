//! Storage Facade: uniform get/set/delete over cache + durable storage.
//!
//! §2.1: "uniform async get/set/delete over the cache layer and the
//! durable-storage layer, honoring an exclusion-prefix list that
//! suppresses durable writes for ephemeral records." This is the leaf
//! component everything else in this module is built on.

use std::sync::Arc;

use topgun_core::CacheRecord;
use tracing::warn;

use super::cache::Cache;
use super::config::RecordConfig;
use super::durable::DurableStore;

/// Uniform tier access, honoring `storageExclusionPrefixes`.
pub struct StorageFacade {
    cache: Arc<dyn Cache>,
    durable: Arc<dyn DurableStore>,
    config: Arc<RecordConfig>,
}

impl StorageFacade {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, durable: Arc<dyn DurableStore>, config: Arc<RecordConfig>) -> Self {
        Self { cache, durable, config }
    }

    /// §4.3 steps 1-3: cache first, durable storage on miss, `None` if
    /// absent from both (not an error). Any backend failure propagates.
    pub async fn get(&self, name: &str) -> anyhow::Result<Option<CacheRecord>> {
        if let Some(record) = self.cache.get(name).await? {
            return Ok(Some(record));
        }
        self.durable.get(name).await
    }

    /// Writes the cache tier only. This is the write that gates the
    /// broadcast (§4.5 step 4) — it must complete before anything else.
    pub async fn write_cache(&self, name: &str, record: CacheRecord) -> anyhow::Result<()> {
        self.cache.set(name, record).await
    }

    /// Writes the durable tier only, unless `name` matches an exclusion
    /// prefix, in which case this is a no-op that never touches the
    /// durable backend (§8 invariant 8).
    ///
    /// Per §4.5 step 5, a failure here is "logged but not surfaced" -- it
    /// never becomes its own error message to the sender. It is still
    /// returned (as a canonical string, §9A) because step 6 folds it into
    /// the `WRITE_ACKNOWLEDGEMENT` payload when one was requested; callers
    /// that never ask for write-ack simply discard the `Some(_)`.
    pub async fn write_durable_best_effort(&self, name: &str, record: CacheRecord) -> Option<String> {
        if self.config.is_storage_excluded(name) {
            return None;
        }
        match self.durable.set(name, record).await {
            Ok(()) => None,
            Err(err) => {
                warn!(name, error = %err, "durable-storage write failed; not surfaced to sender");
                Some(err.to_string())
            }
        }
    }

    /// §4.7 hot-path: cache and storage are written concurrently, and the
    /// caller (the Hot-Path Writer) needs both outcomes to build a
    /// write-ack. An excluded name's durable side is treated as a trivial
    /// success, matching "suppresses durable writes for ephemeral records."
    pub async fn write_both_concurrent(
        &self,
        name: &str,
        record: CacheRecord,
    ) -> (anyhow::Result<()>, anyhow::Result<()>) {
        let durable_fut = async {
            if self.config.is_storage_excluded(name) {
                Ok(())
            } else {
                self.durable.set(name, record.clone()).await
            }
        };
        tokio::join!(self.cache.set(name, record), durable_fut)
    }

    /// §4.8: delete from both tiers, skipping the durable side for
    /// excluded names.
    pub async fn delete_both_concurrent(&self, name: &str) -> (anyhow::Result<()>, anyhow::Result<()>) {
        let durable_fut = async {
            if self.config.is_storage_excluded(name) {
                Ok(())
            } else {
                self.durable.delete(name).await
            }
        };
        tokio::join!(self.cache.delete(name), durable_fut)
    }

    #[must_use]
    pub fn config(&self) -> &RecordConfig {
        &self.config
    }
}
