//! Hot-Path Writer: bypass that writes a whole value directly, skipping
//! the Transition (§2 item 6, §4.7).

use std::sync::Arc;

use topgun_core::{CacheRecord, OutboundMessage};

use super::facade::StorageFacade;
use super::fanout::FanoutAdapter;
use super::registry::MessageSink;

/// Writes a full record value straight to both storage tiers, bypassing
/// per-record serialization entirely. Only valid for full updates --
/// callers must reject a patch on a hot-path name before reaching here
/// (§4.7: "If the operation is a patch on a hot-path name, reply
/// `INVALID_PATCH_ON_HOTPATH` and stop.").
pub struct HotPathWriter {
    facade: Arc<StorageFacade>,
    fanout: Arc<FanoutAdapter>,
}

impl HotPathWriter {
    #[must_use]
    pub fn new(facade: Arc<StorageFacade>, fanout: Arc<FanoutAdapter>) -> Self {
        Self { facade, fanout }
    }

    /// §4.7 force-write: cache and storage in parallel; broadcast on cache
    /// success only; write-ack, if requested, carries either tier's error.
    pub async fn write(
        &self,
        name: &str,
        version: Option<u64>,
        data: serde_json::Value,
        is_write_ack: bool,
        correlation_id: Option<String>,
        sender: &Arc<dyn MessageSink>,
    ) {
        let version = version.unwrap_or(0);
        let record = CacheRecord { version, data: data.clone() };

        let (cache_result, storage_result) = self.facade.write_both_concurrent(name, record).await;

        if cache_result.is_ok() {
            self.fanout.broadcast(
                name,
                OutboundMessage::RecordUpdate { name: name.to_string(), version, data },
                None,
            );
        }

        if is_write_ack {
            let error = cache_result
                .as_ref()
                .err()
                .or(storage_result.as_ref().err())
                .map(std::string::ToString::to_string);
            sender.send(OutboundMessage::WriteAcknowledgement {
                name: name.to_string(),
                version,
                error,
                correlation_id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::cache::InMemoryCache;
    use crate::record::config::RecordConfig;
    use crate::record::durable::InMemoryDurableStore;
    use crate::record::registry::InMemorySubscriptionRegistry;
    use parking_lot::Mutex;
    use serde_json::json;

    struct CollectingSink {
        received: Mutex<Vec<OutboundMessage>>,
    }

    impl MessageSink for CollectingSink {
        fn send(&self, message: OutboundMessage) {
            self.received.lock().push(message);
        }
    }

    fn writer() -> (HotPathWriter, Arc<StorageFacade>) {
        let facade = Arc::new(StorageFacade::new(
            InMemoryCache::shared(),
            InMemoryDurableStore::shared(),
            Arc::new(RecordConfig::default()),
        ));
        let fanout = Arc::new(FanoutAdapter::new(InMemorySubscriptionRegistry::shared()));
        (HotPathWriter::new(facade.clone(), fanout), facade)
    }

    #[tokio::test]
    async fn write_persists_to_cache_at_default_version() {
        let (writer, facade) = writer();
        let sink: Arc<dyn MessageSink> =
            Arc::new(CollectingSink { received: Mutex::new(Vec::new()) });

        writer.write("hot/x", None, json!({"v": 1}), false, None, &sink).await;

        let record = facade.get("hot/x").await.unwrap().unwrap();
        assert_eq!(record.version, 0);
    }

    #[tokio::test]
    async fn write_ack_carries_no_error_on_success() {
        let (writer, _facade) = writer();
        let sink = Arc::new(CollectingSink { received: Mutex::new(Vec::new()) });
        let dyn_sink: Arc<dyn MessageSink> = sink.clone();

        writer
            .write("hot/x", Some(3), json!({"v": 1}), true, Some("c1".to_string()), &dyn_sink)
            .await;

        let received = sink.received.lock();
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            OutboundMessage::WriteAcknowledgement { version: 3, error: None, .. }
        ));
    }

    #[tokio::test]
    async fn broadcast_fires_on_cache_success() {
        let (writer, _facade) = writer();
        let registry = InMemorySubscriptionRegistry::shared();
        let fanout = Arc::new(FanoutAdapter::new(registry.clone()));
        let facade = Arc::new(StorageFacade::new(
            InMemoryCache::shared(),
            InMemoryDurableStore::shared(),
            Arc::new(RecordConfig::default()),
        ));
        let writer = HotPathWriter::new(facade, fanout);

        let sink = Arc::new(CollectingSink { received: Mutex::new(Vec::new()) });
        registry.subscribe(
            "hot/x",
            crate::record::registry::SubscriberId(1),
            sink.clone(),
        );

        let dyn_sink: Arc<dyn MessageSink> = sink.clone();
        writer.write("hot/x", None, json!({"v": 1}), false, None, &dyn_sink).await;

        assert_eq!(sink.received.lock().len(), 1);
    }
}
