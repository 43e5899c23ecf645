//! Record Handler: the message dispatcher (§2 item 5, §4.1).
//!
//! Owns the transition table and drives permissioning for every
//! write-bearing action; routes everything else to the narrow
//! collaborator surfaces (§1) it was handed at construction.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{error, instrument};

use topgun_core::{Action, CacheRecord, InboundMessage, OutboundMessage, SenderContext};

use super::config::RecordConfig;
use super::coalescer::{Coalescer, RequestOrigin};
use super::deletion::DeletionCoordinator;
use super::error::PermissionError;
use super::facade::StorageFacade;
use super::fanout::FanoutAdapter;
use super::hot_path::HotPathWriter;
use super::permission::{evaluate, PermissionEvaluator};
use super::registry::{ListenerRegistry, MessageSink, SubscriberId, SubscriptionRegistry};
use super::stability_gate::StabilityGate;
use super::transition::RecordTransition;

pub struct RecordHandler {
    facade: Arc<StorageFacade>,
    coalescer: Arc<Coalescer>,
    gate: Arc<StabilityGate>,
    fanout: Arc<FanoutAdapter>,
    subscriptions: Arc<dyn SubscriptionRegistry>,
    listeners: Arc<dyn ListenerRegistry>,
    permission: Arc<dyn PermissionEvaluator>,
    config: Arc<RecordConfig>,
    transitions: Arc<DashMap<String, Arc<RecordTransition>>>,
    hot_path: HotPathWriter,
    deletion: DeletionCoordinator,
}

impl RecordHandler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        facade: Arc<StorageFacade>,
        gate: Arc<StabilityGate>,
        subscriptions: Arc<dyn SubscriptionRegistry>,
        listeners: Arc<dyn ListenerRegistry>,
        permission: Arc<dyn PermissionEvaluator>,
        config: Arc<RecordConfig>,
    ) -> Self {
        let coalescer = Arc::new(Coalescer::new(facade.clone(), gate.clone()));
        let fanout = Arc::new(FanoutAdapter::new(subscriptions.clone()));
        let hot_path = HotPathWriter::new(facade.clone(), fanout.clone());
        let deletion = DeletionCoordinator::new(facade.clone(), fanout.clone());
        Self {
            facade,
            coalescer,
            gate,
            fanout,
            subscriptions,
            listeners,
            permission,
            config,
            transitions: Arc::new(DashMap::new()),
            hot_path,
            deletion,
        }
    }

    /// §4.1 dispatch table. `sender` is the caller's identity/attributes;
    /// `subscriber` and `sink` are how the Subscription/Listener Registries
    /// and outbound replies address this particular connection.
    #[instrument(skip(self, sender, sink), fields(action = ?message_kind(&message)))]
    pub async fn handle(
        &self,
        message: InboundMessage,
        sender: SenderContext,
        subscriber: SubscriberId,
        sink: Arc<dyn MessageSink>,
    ) {
        match message {
            InboundMessage::SubscribeCreateAndRead { name, correlation_id } => {
                self.create_or_read(name, correlation_id, sender, subscriber, sink).await;
            }
            InboundMessage::CreateAndUpdate { .. } | InboundMessage::CreateAndPatch { .. } => {
                self.create_and_update(message, sender, sink).await;
            }
            InboundMessage::Read { name, correlation_id } => {
                self.read(name, correlation_id, sink).await;
            }
            InboundMessage::Head { name, correlation_id } => {
                self.head(name, correlation_id, Action::Head, None, sink).await;
            }
            InboundMessage::SubscribeAndHead { name, correlation_id } => {
                self.head(
                    name,
                    correlation_id,
                    Action::SubscribeAndHead,
                    Some((subscriber, sink.clone())),
                    sink,
                )
                .await;
            }
            InboundMessage::Update { .. } | InboundMessage::Patch { .. } | InboundMessage::Erase { .. } => {
                self.versioned_write(message, sender, sink).await;
            }
            InboundMessage::Delete { name, correlation_id } => {
                self.deletion.delete(&self.transitions, &name, &sink, correlation_id).await;
            }
            InboundMessage::DeleteSuccess { name } => {
                self.deletion.delete_success_remote(&self.transitions, &name);
            }
            InboundMessage::Unsubscribe { name } => {
                self.subscriptions.unsubscribe(&name, subscriber, false);
                sink.send(OutboundMessage::UnsubscribeAck { name });
            }
            InboundMessage::Listen { .. }
            | InboundMessage::Unlisten { .. }
            | InboundMessage::ListenAccept { .. }
            | InboundMessage::ListenReject { .. } => {
                self.listeners.handle(subscriber, sink, message);
            }
        }
    }

    /// §4.2: one-shot snapshot. Not permission-gated on its own -- only
    /// the create-and-read compound action checks READ/CREATE (§4.6).
    async fn read(&self, name: String, correlation_id: Option<String>, sink: Arc<dyn MessageSink>) {
        match self.coalescer.load(&name, RequestOrigin::Client).await {
            Ok(Some(record)) => sink.send(OutboundMessage::ReadResponse {
                name,
                version: record.version,
                data: record.data,
                correlation_id,
            }),
            Ok(None) => sink.send(OutboundMessage::RecordNotFound { name, correlation_id }),
            Err(err) => sink.send(OutboundMessage::RecordLoadError {
                name,
                error: err.to_string(),
                original_action: Action::Read,
                correlation_id,
            }),
        }
    }

    /// §4.2 / §9A: a miss is version -1, never collapsed with a transport
    /// failure, which always surfaces as `RECORD_LOAD_ERROR`. When
    /// `subscribe_as` is set this also establishes the subscription
    /// (`SUBSCRIBE_AND_HEAD`).
    async fn head(
        &self,
        name: String,
        correlation_id: Option<String>,
        original_action: Action,
        subscribe_as: Option<(SubscriberId, Arc<dyn MessageSink>)>,
        sink: Arc<dyn MessageSink>,
    ) {
        match self.coalescer.load(&name, RequestOrigin::Client).await {
            Ok(record) => {
                if let Some((id, subscriber_sink)) = subscribe_as {
                    self.subscriptions.subscribe(&name, id, subscriber_sink);
                }
                let version = record.map_or(-1, |r| i64::try_from(r.version).unwrap_or(i64::MAX));
                sink.send(OutboundMessage::HeadResponse { name, version, correlation_id });
            }
            Err(err) => sink.send(OutboundMessage::RecordLoadError {
                name,
                error: err.to_string(),
                original_action,
                correlation_id,
            }),
        }
    }

    /// §4.6 `createOrRead`.
    async fn create_or_read(
        &self,
        name: String,
        correlation_id: Option<String>,
        sender: SenderContext,
        subscriber: SubscriberId,
        sink: Arc<dyn MessageSink>,
    ) {
        match self.coalescer.load(&name, RequestOrigin::Client).await {
            Err(err) => sink.send(OutboundMessage::RecordLoadError {
                name,
                error: err.to_string(),
                original_action: Action::SubscribeCreateAndRead,
                correlation_id,
            }),
            Ok(Some(record)) => {
                if !self
                    .check_permission(
                        Action::Read,
                        &name,
                        &sender,
                        Action::SubscribeCreateAndRead,
                        correlation_id.clone(),
                        &sink,
                    )
                    .await
                {
                    return;
                }
                self.subscriptions.subscribe(&name, subscriber, sink.clone());
                sink.send(OutboundMessage::SubscribeAck { name: name.clone(), correlation_id: correlation_id.clone() });
                sink.send(OutboundMessage::ReadResponse {
                    name,
                    version: record.version,
                    data: record.data,
                    correlation_id,
                });
            }
            Ok(None) => {
                if !self
                    .check_permission(
                        Action::Create,
                        &name,
                        &sender,
                        Action::SubscribeCreateAndRead,
                        correlation_id.clone(),
                        &sink,
                    )
                    .await
                {
                    return;
                }
                let (cache_result, _storage_result) = self
                    .facade
                    .write_both_concurrent(&name, CacheRecord { version: 0, data: Value::Object(serde_json::Map::new()) })
                    .await;
                if let Err(err) = cache_result {
                    sink.send(OutboundMessage::RecordCreateError {
                        name,
                        error: err.to_string(),
                        correlation_id,
                    });
                    return;
                }
                self.subscriptions.subscribe(&name, subscriber, sink.clone());
                sink.send(OutboundMessage::SubscribeAck { name: name.clone(), correlation_id: correlation_id.clone() });
                sink.send(OutboundMessage::ReadResponse {
                    name,
                    version: 0,
                    data: Value::Object(serde_json::Map::new()),
                    correlation_id,
                });
            }
        }
    }

    /// §4.7 `createAndUpdate` / Hot-Path.
    async fn create_and_update(&self, message: InboundMessage, sender: SenderContext, sink: Arc<dyn MessageSink>) {
        let (name, version, is_write_ack, correlation_id, is_patch, data) = match &message {
            InboundMessage::CreateAndUpdate { name, version, data, is_write_ack, correlation_id } => {
                (name.clone(), *version, *is_write_ack, correlation_id.clone(), false, data.clone())
            }
            InboundMessage::CreateAndPatch { name, version, data, is_write_ack, correlation_id, .. } => {
                (name.clone(), *version, *is_write_ack, correlation_id.clone(), true, data.clone())
            }
            _ => unreachable!("create_and_update called with unexpected variant"),
        };
        let original_action = if is_patch { Action::CreateAndPatch } else { Action::CreateAndUpdate };

        if self.config.is_hot_path(&name) {
            if is_patch {
                sink.send(OutboundMessage::InvalidPatchOnHotpath { name, correlation_id });
                return;
            }
            if !self
                .check_permission(Action::Create, &name, &sender, original_action, correlation_id.clone(), &sink)
                .await
            {
                return;
            }
            if !self
                .check_permission(Action::Update, &name, &sender, original_action, correlation_id.clone(), &sink)
                .await
            {
                return;
            }
            self.hot_path.write(&name, version, data, is_write_ack, correlation_id, &sink).await;
            return;
        }

        if let Some(transition) = self.transitions.get(&name).map(|entry| Arc::clone(entry.value())) {
            let action = if is_patch { Action::Patch } else { Action::Update };
            if !self.check_permission(action, &name, &sender, original_action, correlation_id.clone(), &sink).await {
                return;
            }
            if transition.add(sink.clone(), message, false) {
                return;
            }
            // The transition drained and closed between the lookup above
            // and this call; fall through and spawn a fresh one exactly
            // as if none had been found.
        }

        if !self
            .check_permission(Action::Create, &name, &sender, original_action, correlation_id.clone(), &sink)
            .await
        {
            return;
        }
        if !self
            .check_permission(Action::Update, &name, &sender, original_action, correlation_id.clone(), &sink)
            .await
        {
            return;
        }

        let initial = match self.coalescer.load(&name, RequestOrigin::Client).await {
            Ok(record) => record.map(|r| (r.version, r.data)),
            Err(err) => {
                sink.send(OutboundMessage::RecordLoadError {
                    name,
                    error: err.to_string(),
                    original_action,
                    correlation_id,
                });
                return;
            }
        };
        let transition = self.spawn_transition(name, initial);
        let _ = transition.add(sink, message, true);
    }

    /// Plain `UPDATE`/`PATCH`/`ERASE` against an existing or in-flight record.
    async fn versioned_write(&self, message: InboundMessage, sender: SenderContext, sink: Arc<dyn MessageSink>) {
        let name = message.name().unwrap_or_default().to_string();
        let correlation_id = message.correlation_id().map(str::to_string);
        let action = match &message {
            InboundMessage::Update { .. } => Action::Update,
            InboundMessage::Patch { .. } => Action::Patch,
            InboundMessage::Erase { .. } => Action::Erase,
            _ => unreachable!("versioned_write called with unexpected variant"),
        };

        if !self.check_permission(action, &name, &sender, action, correlation_id.clone(), &sink).await {
            return;
        }

        if let Some(transition) = self.transitions.get(&name).map(|entry| Arc::clone(entry.value())) {
            if transition.add(sink.clone(), message.clone(), false) {
                return;
            }
            // Closed between the lookup and this call; spawn fresh below.
        }

        let initial = match self.coalescer.load(&name, RequestOrigin::Client).await {
            Ok(record) => record.map(|r| (r.version, r.data)),
            Err(err) => {
                sink.send(OutboundMessage::RecordLoadError {
                    name,
                    error: err.to_string(),
                    original_action: action,
                    correlation_id,
                });
                return;
            }
        };
        let transition = self.spawn_transition(name, initial);
        let _ = transition.add(sink, message, false);
    }

    /// §4.9: runs one permission check, emitting `MESSAGE_DENIED` or
    /// `MESSAGE_PERMISSION_ERROR` on the caller's behalf. Returns whether
    /// the caller may proceed.
    ///
    /// §1/§4.3: evaluating an action may itself require reading the
    /// record's current value, so this reads it through the Coalescer
    /// with `RequestOrigin::PermissionEvaluator` -- a Stability-Gate-gated
    /// read that never observes a record mid-write -- before handing it
    /// to the evaluator. A load failure here is treated as a permission
    /// evaluation failure rather than as `RECORD_LOAD_ERROR`, since the
    /// caller is in the middle of a permission check, not a read action.
    async fn check_permission(
        &self,
        action: Action,
        name: &str,
        sender: &SenderContext,
        original_action: Action,
        correlation_id: Option<String>,
        sink: &Arc<dyn MessageSink>,
    ) -> bool {
        let record = match self.coalescer.load(name, RequestOrigin::PermissionEvaluator).await {
            Ok(record) => record,
            Err(err) => {
                error!(name, reason = %err, "permission evaluator gated read failed");
                sink.send(OutboundMessage::MessagePermissionError {
                    name: name.to_string(),
                    original_action,
                    correlation_id,
                });
                return false;
            }
        };

        match evaluate(self.permission.as_ref(), action, name, record.as_ref(), sender).await {
            Ok(()) => true,
            Err(PermissionError::Denied) => {
                sink.send(OutboundMessage::MessageDenied {
                    name: name.to_string(),
                    original_action,
                    correlation_id,
                });
                false
            }
            Err(PermissionError::EvaluatorFailed(reason)) => {
                error!(name, reason, "permission evaluator error");
                sink.send(OutboundMessage::MessagePermissionError {
                    name: name.to_string(),
                    original_action,
                    correlation_id,
                });
                false
            }
        }
    }

    /// Creates a new per-name Transition, registers it, and wires its
    /// completion callback to remove itself once its queue drains (§4.5
    /// step 8: "if empty, signal the Handler via `transitionComplete`").
    fn spawn_transition(&self, name: String, initial: Option<(u64, Value)>) -> Arc<RecordTransition> {
        let transitions = self.transitions.clone();
        let on_complete: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(move |name: &str| {
            transitions.remove(name);
        });
        let transition = RecordTransition::new(
            name.clone(),
            initial,
            self.facade.clone(),
            self.fanout.clone(),
            self.gate.clone(),
            on_complete,
        );
        self.transitions.insert(name, Arc::clone(&transition));
        transition
    }
}

fn message_kind(message: &InboundMessage) -> &'static str {
    match message {
        InboundMessage::SubscribeCreateAndRead { .. } => "subscribe_create_and_read",
        InboundMessage::CreateAndUpdate { .. } => "create_and_update",
        InboundMessage::CreateAndPatch { .. } => "create_and_patch",
        InboundMessage::Read { .. } => "read",
        InboundMessage::Head { .. } => "head",
        InboundMessage::SubscribeAndHead { .. } => "subscribe_and_head",
        InboundMessage::Update { .. } => "update",
        InboundMessage::Patch { .. } => "patch",
        InboundMessage::Erase { .. } => "erase",
        InboundMessage::Delete { .. } => "delete",
        InboundMessage::DeleteSuccess { .. } => "delete_success",
        InboundMessage::Unsubscribe { .. } => "unsubscribe",
        InboundMessage::Listen { .. } => "listen",
        InboundMessage::Unlisten { .. } => "unlisten",
        InboundMessage::ListenAccept { .. } => "listen_accept",
        InboundMessage::ListenReject { .. } => "listen_reject",
    }
}
