//! Subscription Registry and Listener Registry capability surfaces.
//!
//! Per §1 these are external collaborators "specified only by interface";
//! §6 gives their shape (`subscribe`, `unsubscribe`, `sendToSubscribers`,
//! `getLocalSubscribers`, and a single `handle` entry point for listen
//! traffic). This module defines the narrow traits plus `DashMap`-backed
//! reference implementations good enough to drive the core's own tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use topgun_core::{InboundMessage, OutboundMessage};

/// Opaque handle for one subscriber connection, assigned by whatever owns
/// the real transport. The core never interprets it beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

/// One recipient of outbound traffic: a client socket, a peer-bus link, or
/// (in tests) an in-process collector.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: OutboundMessage);
}

/// §6: `subscribe`/`unsubscribe`/`sendToSubscribers`/`getLocalSubscribers`.
pub trait SubscriptionRegistry: Send + Sync {
    fn subscribe(&self, name: &str, id: SubscriberId, sink: Arc<dyn MessageSink>);

    /// `silent` suppresses the unsubscribe-ack some deployments send; the
    /// core itself never relies on that reply, so it is left to the
    /// registry implementation to interpret.
    fn unsubscribe(&self, name: &str, id: SubscriberId, silent: bool);

    /// Removes every local subscriber for `name` without sending any of
    /// them an unsubscribe acknowledgement (§4.8: "unsubscribe each local
    /// subscriber" as part of deletion, not a client-initiated UNSUBSCRIBE).
    fn unsubscribe_all(&self, name: &str);

    fn send_to_subscribers(
        &self,
        name: &str,
        message: OutboundMessage,
        exclude: Option<SubscriberId>,
    );

    fn local_subscriber_count(&self, name: &str) -> usize;
}

/// §6: `handle(sender, listenMsg)` — delegates LISTEN/UNLISTEN/
/// LISTEN_ACCEPT/LISTEN_REJECT traffic wholesale; the matching algorithm
/// over patterns is entirely the registry's concern.
pub trait ListenerRegistry: Send + Sync {
    fn handle(&self, id: SubscriberId, sink: Arc<dyn MessageSink>, message: InboundMessage);
}

/// Minimal in-memory `SubscriptionRegistry` for tests and single-process
/// deployments: one `DashMap` of name to subscriber list.
#[derive(Default)]
pub struct InMemorySubscriptionRegistry {
    subscribers: DashMap<String, Vec<(SubscriberId, Arc<dyn MessageSink>)>>,
}

impl InMemorySubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl SubscriptionRegistry for InMemorySubscriptionRegistry {
    fn subscribe(&self, name: &str, id: SubscriberId, sink: Arc<dyn MessageSink>) {
        let mut entry = self.subscribers.entry(name.to_string()).or_default();
        entry.retain(|(existing, _)| *existing != id);
        entry.push((id, sink));
    }

    fn unsubscribe(&self, name: &str, id: SubscriberId, _silent: bool) {
        if let Some(mut entry) = self.subscribers.get_mut(name) {
            entry.retain(|(existing, _)| *existing != id);
        }
    }

    fn unsubscribe_all(&self, name: &str) {
        self.subscribers.remove(name);
    }

    fn send_to_subscribers(
        &self,
        name: &str,
        message: OutboundMessage,
        exclude: Option<SubscriberId>,
    ) {
        if let Some(entry) = self.subscribers.get(name) {
            for (id, sink) in entry.iter() {
                if Some(*id) == exclude {
                    continue;
                }
                sink.send(message.clone());
            }
        }
    }

    fn local_subscriber_count(&self, name: &str) -> usize {
        self.subscribers.get(name).map_or(0, |entry| entry.len())
    }
}

/// Issues unique [`SubscriberId`]s for a process lifetime; a convenience
/// companion to the in-memory registries above, not part of any trait.
#[derive(Default)]
pub struct SubscriberIdAllocator {
    next: AtomicU64,
}

impl SubscriberIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> SubscriberId {
        SubscriberId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
