//! Deletion Coordinator (§2 item 7, §4.8).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use super::facade::StorageFacade;
use super::fanout::FanoutAdapter;
use super::registry::MessageSink;
use super::transition::RecordTransition;
use topgun_core::OutboundMessage;

pub struct DeletionCoordinator {
    facade: Arc<StorageFacade>,
    fanout: Arc<FanoutAdapter>,
}

impl DeletionCoordinator {
    #[must_use]
    pub fn new(facade: Arc<StorageFacade>, fanout: Arc<FanoutAdapter>) -> Self {
        Self { facade, fanout }
    }

    /// Locally originated `DELETE`: abort any transition, delete from both
    /// tiers, and on success broadcast + tear down local subscribers +
    /// acknowledge the requester. On tier failure, emit `RECORD_DELETE_ERROR`.
    pub async fn delete(
        &self,
        transitions: &DashMap<String, Arc<RecordTransition>>,
        name: &str,
        sender: &Arc<dyn MessageSink>,
        correlation_id: Option<String>,
    ) {
        if let Some((_, transition)) = transitions.remove(name) {
            transition.destroy();
        }

        let (cache_result, storage_result) = self.facade.delete_both_concurrent(name).await;
        match (cache_result, storage_result) {
            (Ok(()), Ok(())) => {
                self.fanout.broadcast(
                    name,
                    OutboundMessage::DeleteSuccess { name: name.to_string(), correlation_id: None },
                    None,
                );
                self.fanout.unsubscribe_all(name);
                sender.send(OutboundMessage::DeleteSuccess {
                    name: name.to_string(),
                    correlation_id,
                });
            }
            (cache_result, storage_result) => {
                let error = cache_result
                    .err()
                    .or(storage_result.err())
                    .map_or_else(|| "delete failed".to_string(), |e| e.to_string());
                warn!(name, error = %error, "record delete failed");
                sender.send(OutboundMessage::RecordDeleteError {
                    name: name.to_string(),
                    error,
                    correlation_id,
                });
            }
        }
    }

    /// A remote peer already applied this deletion upstream (§4.8): abort
    /// any local transition and mirror only the local-visible effects --
    /// no cache/storage call, since the origin node already made them.
    pub fn delete_success_remote(&self, transitions: &DashMap<String, Arc<RecordTransition>>, name: &str) {
        if let Some((_, transition)) = transitions.remove(name) {
            transition.destroy();
        }
        self.fanout.broadcast(
            name,
            OutboundMessage::DeleteSuccess { name: name.to_string(), correlation_id: None },
            None,
        );
        self.fanout.unsubscribe_all(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::cache::InMemoryCache;
    use crate::record::config::RecordConfig;
    use crate::record::durable::InMemoryDurableStore;
    use crate::record::registry::InMemorySubscriptionRegistry;
    use crate::record::stability_gate::StabilityGate;
    use parking_lot::Mutex;
    use serde_json::json;
    use topgun_core::CacheRecord;

    struct CollectingSink {
        received: Mutex<Vec<OutboundMessage>>,
    }

    impl MessageSink for CollectingSink {
        fn send(&self, message: OutboundMessage) {
            self.received.lock().push(message);
        }
    }

    #[tokio::test]
    async fn delete_of_existing_record_acknowledges_and_broadcasts() {
        let facade = Arc::new(StorageFacade::new(
            InMemoryCache::shared(),
            InMemoryDurableStore::shared(),
            Arc::new(RecordConfig::default()),
        ));
        facade
            .write_cache("a/1", CacheRecord { version: 0, data: json!({}) })
            .await
            .unwrap();
        let registry = InMemorySubscriptionRegistry::shared();
        let fanout = Arc::new(FanoutAdapter::new(registry.clone()));
        let coordinator = DeletionCoordinator::new(facade.clone(), fanout);
        let transitions: DashMap<String, Arc<RecordTransition>> = DashMap::new();

        let subscriber_sink = Arc::new(CollectingSink { received: Mutex::new(Vec::new()) });
        registry.subscribe(
            "a/1",
            crate::record::registry::SubscriberId(1),
            subscriber_sink.clone(),
        );

        let requester: Arc<dyn MessageSink> =
            Arc::new(CollectingSink { received: Mutex::new(Vec::new()) });
        coordinator
            .delete(&transitions, "a/1", &requester, Some("c1".to_string()))
            .await;

        assert!(facade.get("a/1").await.unwrap().is_none());
        assert_eq!(registry.local_subscriber_count("a/1"), 0);
        assert_eq!(subscriber_sink.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn delete_destroys_active_transition() {
        let facade = Arc::new(StorageFacade::new(
            InMemoryCache::shared(),
            InMemoryDurableStore::shared(),
            Arc::new(RecordConfig::default()),
        ));
        let registry = InMemorySubscriptionRegistry::shared();
        let fanout = Arc::new(FanoutAdapter::new(registry));
        let gate = Arc::new(StabilityGate::new());
        let transition = RecordTransition::new(
            "r".to_string(),
            Some((0, json!({}))),
            facade.clone(),
            fanout.clone(),
            gate,
            Arc::new(|_: &str| {}),
        );

        let ack_sink: Arc<dyn MessageSink> =
            Arc::new(CollectingSink { received: Mutex::new(Vec::new()) });
        let _ = transition.add(
            ack_sink.clone(),
            topgun_core::InboundMessage::Update {
                name: "r".to_string(),
                version: 1,
                data: json!({"x": 1}),
                is_write_ack: true,
                correlation_id: None,
            },
            false,
        );

        let transitions: DashMap<String, Arc<RecordTransition>> = DashMap::new();
        transitions.insert("r".to_string(), transition);

        let coordinator = DeletionCoordinator::new(facade, fanout.clone());
        let requester: Arc<dyn MessageSink> =
            Arc::new(CollectingSink { received: Mutex::new(Vec::new()) });
        coordinator.delete(&transitions, "r", &requester, None).await;

        assert!(transitions.get("r").is_none());
    }

    #[test]
    fn remote_delete_success_skips_storage_and_unsubscribes() {
        let registry = InMemorySubscriptionRegistry::shared();
        let fanout = Arc::new(FanoutAdapter::new(registry.clone()));
        let facade = Arc::new(StorageFacade::new(
            InMemoryCache::shared(),
            InMemoryDurableStore::shared(),
            Arc::new(RecordConfig::default()),
        ));
        let coordinator = DeletionCoordinator::new(facade, fanout);
        let transitions: DashMap<String, Arc<RecordTransition>> = DashMap::new();

        let sink = Arc::new(CollectingSink { received: Mutex::new(Vec::new()) });
        registry.subscribe("a/1", crate::record::registry::SubscriberId(1), sink.clone());

        coordinator.delete_success_remote(&transitions, "a/1");
        assert_eq!(registry.local_subscriber_count("a/1"), 0);
        assert_eq!(sink.received.lock().len(), 1);
    }
}
