//! Record Transition: the per-record write serializer.
//!
//! §4.5. One `RecordTransition` exists per record name while there is
//! pending work for it (§3 invariant: "At most one Record Transition
//! exists for a given name at any instant"). Modeled as a per-record actor
//! per §9's design note and §5's "per-name actor" resolution: `add` pushes
//! an accepted step onto an unbounded channel; a single spawned task drains
//! it one step at a time, in order, never reordering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use topgun_core::{apply_erase, apply_patch, CacheRecord, InboundMessage, OutboundMessage};

use super::facade::StorageFacade;
use super::fanout::FanoutAdapter;
use super::registry::MessageSink;
use super::stability_gate::StabilityGate;

/// One queued write, already accepted past the version check in [`RecordTransition::add`].
struct AcceptedStep {
    sender: Arc<dyn MessageSink>,
    message: InboundMessage,
    version: u64,
}

/// What a step does to the resident value, extracted from its
/// [`InboundMessage`] variant. §4.5 step 1: "Parse the payload from the
/// sender (single call; reuse already-parsed data on subsequent touches)" —
/// here the payload is already a typed `InboundMessage`, so this *is* that
/// single parse.
enum StepKind {
    Full(Value),
    Patch { path: String, value: Value },
    Erase { path: String },
}

struct StepFields {
    kind: StepKind,
    /// `None` only for a `CreateAndUpdate`/`CreateAndPatch` step that
    /// omitted a version; `Update`/`Patch`/`Erase` always carry one.
    version: Option<u64>,
    is_write_ack: bool,
    correlation_id: Option<String>,
}

/// Extracts the fields `RecordTransition` needs from a write-bearing
/// inbound message. Only ever called on the five variants that reach
/// [`RecordTransition::add`] (`CreateAndUpdate`, `CreateAndPatch`,
/// `Update`, `Patch`, `Erase`).
fn step_fields(message: &InboundMessage) -> StepFields {
    match message {
        InboundMessage::CreateAndUpdate { version, data, is_write_ack, correlation_id, .. } => {
            StepFields {
                kind: StepKind::Full(data.clone()),
                version: *version,
                is_write_ack: *is_write_ack,
                correlation_id: correlation_id.clone(),
            }
        }
        InboundMessage::CreateAndPatch { version, path, data, is_write_ack, correlation_id, .. } => {
            StepFields {
                kind: StepKind::Patch { path: path.clone(), value: data.clone() },
                version: *version,
                is_write_ack: *is_write_ack,
                correlation_id: correlation_id.clone(),
            }
        }
        InboundMessage::Update { version, data, is_write_ack, correlation_id, .. } => StepFields {
            kind: StepKind::Full(data.clone()),
            version: Some(*version),
            is_write_ack: *is_write_ack,
            correlation_id: correlation_id.clone(),
        },
        InboundMessage::Patch { version, path, data, is_write_ack, correlation_id, .. } => {
            StepFields {
                kind: StepKind::Patch { path: path.clone(), value: data.clone() },
                version: Some(*version),
                is_write_ack: *is_write_ack,
                correlation_id: correlation_id.clone(),
            }
        }
        InboundMessage::Erase { version, path, is_write_ack, correlation_id, .. } => StepFields {
            kind: StepKind::Erase { path: path.clone() },
            version: Some(*version),
            is_write_ack: *is_write_ack,
            correlation_id: correlation_id.clone(),
        },
        other => unreachable!("step_fields called on non-write-bearing message: {other:?}"),
    }
}

/// Shared by `has_version` and `add`'s inline version check -- `hasVersion`
/// per §4.5 is "at or below the highest version already accepted."
fn version_already_accepted(state: &TransitionState, v: i64) -> bool {
    v <= state.accepted_version
}

/// Shared by `send_version_exists` and `add`'s inline rejection path --
/// always built from the *committed* pair, never an in-flight value.
fn version_exists_message(name: &str, state: &TransitionState, correlation_id: Option<String>) -> OutboundMessage {
    OutboundMessage::VersionExists {
        name: name.to_string(),
        current_version: state.committed_version,
        current_data: state.committed_data.clone(),
        correlation_id,
    }
}

struct TransitionState {
    /// Highest version accepted into the queue so far; -1 means the
    /// record did not exist when this transition was created and nothing
    /// has been accepted yet. Drives `hasVersion` (§4.5).
    accepted_version: i64,
    committed_version: u64,
    committed_data: Value,
    destroyed: bool,
    /// Steps sent but not yet finished draining. Guarded by the same lock
    /// as the rest of the state so `add` and the draining task agree on
    /// whether this transition is still able to accept work: the task
    /// only flips `closed` while holding this lock after the decrement
    /// that brings the count to zero, so `add` can never enqueue onto a
    /// channel whose receiver has already been dropped.
    queue_len: u64,
    /// Set once the draining task has decided to exit. A transition in
    /// this state is already unregistered (or about to be) from the
    /// Handler's table; `add` reports this back so the caller retries
    /// against a freshly spawned transition instead.
    closed: bool,
}

/// The initial value a freshly-created record gets before any step has
/// committed -- matches the `{ v:0, d:{} }` created elsewhere on first write.
fn empty_record() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Per-record write serializer (§4.5). Construct via [`RecordTransition::new`],
/// which spawns the draining task; `add` is the only mutating entry point
/// callers need.
pub struct RecordTransition {
    name: String,
    tx: mpsc::UnboundedSender<AcceptedStep>,
    state: Mutex<TransitionState>,
    destroyed_flag: AtomicBool,
}

impl RecordTransition {
    /// `initial` is the record's current `(version, data)` if one exists;
    /// `None` means this transition is being created to back a brand-new
    /// record, enabling the upsert first-step rule.
    #[must_use]
    pub fn new(
        name: String,
        initial: Option<(u64, Value)>,
        facade: Arc<StorageFacade>,
        fanout: Arc<FanoutAdapter>,
        gate: Arc<StabilityGate>,
        on_complete: Arc<dyn Fn(&str) + Send + Sync>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (accepted_version, committed_version, committed_data) = match initial {
            Some((v, data)) => (v as i64, v, data),
            None => (-1, 0, empty_record()),
        };
        let transition = Arc::new(Self {
            name: name.clone(),
            tx,
            state: Mutex::new(TransitionState {
                accepted_version,
                committed_version,
                committed_data: committed_data.clone(),
                destroyed: false,
                queue_len: 0,
                closed: false,
            }),
            destroyed_flag: AtomicBool::new(false),
        });

        Self::spawn_task(Arc::clone(&transition), rx, facade, fanout, gate, on_complete);
        transition
    }

    fn spawn_task(
        this: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<AcceptedStep>,
        facade: Arc<StorageFacade>,
        fanout: Arc<FanoutAdapter>,
        gate: Arc<StabilityGate>,
        on_complete: Arc<dyn Fn(&str) + Send + Sync>,
    ) {
        tokio::spawn(async move {
            let mut resident = { this.state.lock().committed_data.clone() };
            while let Some(step) = rx.recv().await {
                if this.destroyed_flag.load(Ordering::SeqCst) {
                    Self::reply_abort(&step);
                } else {
                    Self::process_step(&this, &facade, &fanout, &gate, &mut resident, step).await;
                }

                // §4.5 step 8: the transition dies once its queue drains.
                // `closed` is flipped under the same lock `add` checks, so
                // a step that loses this race against `add` is never
                // enqueued onto a channel whose receiver is about to be
                // dropped -- `add` sees `closed` and reports back instead.
                let mut state = this.state.lock();
                state.queue_len -= 1;
                let drained = state.queue_len == 0;
                if drained {
                    state.closed = true;
                }
                drop(state);
                if drained {
                    on_complete(&this.name);
                    return;
                }
            }
            on_complete(&this.name);
        });
    }

    async fn process_step(
        this: &Arc<Self>,
        facade: &Arc<StorageFacade>,
        fanout: &Arc<FanoutAdapter>,
        gate: &Arc<StabilityGate>,
        resident: &mut Value,
        step: AcceptedStep,
    ) {
        gate.begin_write(&this.name);
        let fields = step_fields(&step.message);
        match &fields.kind {
            StepKind::Full(data) => *resident = data.clone(),
            StepKind::Patch { path, value } => {
                if let Err(err) = apply_patch(resident, path, value.clone()) {
                    step.sender.send(OutboundMessage::RecordUpdateError {
                        name: this.name.clone(),
                        error: err.to_string(),
                        correlation_id: fields.correlation_id.clone(),
                    });
                    gate.release(&this.name);
                    return;
                }
            }
            StepKind::Erase { path } => {
                if let Err(err) = apply_erase(resident, path) {
                    step.sender.send(OutboundMessage::RecordUpdateError {
                        name: this.name.clone(),
                        error: err.to_string(),
                        correlation_id: fields.correlation_id.clone(),
                    });
                    gate.release(&this.name);
                    return;
                }
            }
        }

        let record = CacheRecord { version: step.version, data: resident.clone() };
        match facade.write_cache(&this.name, record.clone()).await {
            Ok(()) => {
                {
                    let mut state = this.state.lock();
                    state.committed_version = step.version;
                    state.committed_data = resident.clone();
                }
                fanout.broadcast(&this.name, outbound_for(&fields.kind, &this.name, step.version), None);
                let storage_error = facade.write_durable_best_effort(&this.name, record).await;
                if fields.is_write_ack {
                    step.sender.send(OutboundMessage::WriteAcknowledgement {
                        name: this.name.clone(),
                        version: step.version,
                        error: storage_error,
                        correlation_id: fields.correlation_id.clone(),
                    });
                }
            }
            Err(err) => {
                step.sender.send(OutboundMessage::RecordUpdateError {
                    name: this.name.clone(),
                    error: err.to_string(),
                    correlation_id: fields.correlation_id.clone(),
                });
            }
        }

        gate.release(&this.name);
    }

    fn reply_abort(step: &AcceptedStep) {
        let fields = step_fields(&step.message);
        if fields.is_write_ack {
            step.sender.send(OutboundMessage::WriteAcknowledgement {
                name: step.message.name().unwrap_or_default().to_string(),
                version: step.version,
                error: Some("transition aborted".to_string()),
                correlation_id: fields.correlation_id,
            });
        }
    }

    /// `hasVersion`: true iff `v` is at or below the highest version
    /// already accepted into the queue.
    #[must_use]
    pub fn has_version(&self, v: u64) -> bool {
        version_already_accepted(&self.state.lock(), v as i64)
    }

    /// Emits `VERSION_EXISTS` carrying the most recently *committed*
    /// version/data -- not an in-flight uncommitted value -- to `sender`.
    pub fn send_version_exists(&self, sender: &dyn MessageSink, correlation_id: Option<String>) {
        let state = self.state.lock();
        sender.send(version_exists_message(&self.name, &state, correlation_id));
    }

    /// Enqueues one step. `upsert` is true only for the very first step of
    /// a transition backing a record that did not previously exist (§4.5:
    /// "In upsert mode on a freshly created record, the first accepted
    /// version is whatever the client supplied").
    ///
    /// Returns `false` if this transition has already drained and closed
    /// (it raced the caller's lookup against its own completion): nothing
    /// is sent to `sender` in that case, and the caller should spawn a
    /// fresh transition and retry there instead of treating this as a
    /// version or permission outcome.
    #[must_use]
    pub fn add(&self, sender: Arc<dyn MessageSink>, message: InboundMessage, upsert: bool) -> bool {
        let fields = step_fields(&message);
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        if state.destroyed {
            drop(state);
            if fields.is_write_ack {
                sender.send(OutboundMessage::WriteAcknowledgement {
                    name: self.name.clone(),
                    version: fields.version.unwrap_or(0),
                    error: Some("transition aborted".to_string()),
                    correlation_id: fields.correlation_id,
                });
            }
            return true;
        }

        let accepted_as = if upsert && state.accepted_version < 0 {
            fields.version.unwrap_or(0)
        } else {
            let current = state.accepted_version;
            let v = fields.version.unwrap_or_else(|| (current + 1).max(0) as u64) as i64;
            if version_already_accepted(&state, v) {
                let msg = version_exists_message(&self.name, &state, fields.correlation_id);
                drop(state);
                sender.send(msg);
                return true;
            }
            if v != current + 1 {
                let committed_version = state.committed_version;
                drop(state);
                sender.send(OutboundMessage::InvalidVersion {
                    name: self.name.clone(),
                    current_version: committed_version,
                    correlation_id: fields.correlation_id,
                });
                return true;
            }
            v as u64
        };

        state.accepted_version = accepted_as as i64;
        state.queue_len += 1;
        drop(state);
        let _ = self.tx.send(AcceptedStep { sender, message, version: accepted_as });
        true
    }

    /// Aborts all pending steps without persisting or broadcasting
    /// further; queued write-ack waiters are drained with an abort error
    /// as they are popped by the draining task (§4.5 `destroy`).
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.destroyed = true;
        drop(state);
        self.destroyed_flag.store(true, Ordering::SeqCst);
    }
}

fn outbound_for(kind: &StepKind, name: &str, version: u64) -> OutboundMessage {
    match kind {
        StepKind::Full(data) => {
            OutboundMessage::RecordUpdate { name: name.to_string(), version, data: data.clone() }
        }
        StepKind::Patch { path, value } => OutboundMessage::RecordPatch {
            name: name.to_string(),
            version,
            path: path.clone(),
            data: value.clone(),
        },
        StepKind::Erase { path } => {
            OutboundMessage::RecordErase { name: name.to_string(), version, path: path.clone() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::cache::InMemoryCache;
    use crate::record::config::RecordConfig;
    use crate::record::durable::InMemoryDurableStore;
    use crate::record::registry::{InMemorySubscriptionRegistry, SubscriberId};
    use parking_lot::Mutex as PMutex;
    use serde_json::json;
    use std::time::Duration;

    struct CollectingSink {
        received: PMutex<Vec<OutboundMessage>>,
    }

    impl MessageSink for CollectingSink {
        fn send(&self, message: OutboundMessage) {
            self.received.lock().push(message);
        }
    }

    fn env() -> (Arc<StorageFacade>, Arc<FanoutAdapter>, Arc<StabilityGate>) {
        let facade = Arc::new(StorageFacade::new(
            InMemoryCache::shared(),
            InMemoryDurableStore::shared(),
            Arc::new(RecordConfig::default()),
        ));
        let registry = InMemorySubscriptionRegistry::shared();
        (facade, Arc::new(FanoutAdapter::new(registry)), Arc::new(StabilityGate::new()))
    }

    fn update(name: &str, version: u64, data: serde_json::Value) -> InboundMessage {
        InboundMessage::Update {
            name: name.to_string(),
            version,
            data,
            is_write_ack: false,
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn sequential_updates_broadcast_in_order() {
        let (facade, fanout, gate) = env();
        let sink = Arc::new(CollectingSink { received: PMutex::new(Vec::new()) });
        let transition = RecordTransition::new(
            "a/1".to_string(),
            Some((0, json!({}))),
            facade,
            fanout.clone(),
            gate,
            Arc::new(|_: &str| {}),
        );

        let _ = transition.add(sink.clone(), update("a/1", 1, json!({"x": 1})), false);
        let _ = transition.add(sink.clone(), update("a/1", 2, json!({"x": 1, "y": 2})), false);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let received = sink.received.lock();
        assert_eq!(received.len(), 2);
        assert!(matches!(&received[0], OutboundMessage::RecordUpdate { version: 1, .. }));
        assert!(matches!(&received[1], OutboundMessage::RecordUpdate { version: 2, .. }));
    }

    #[tokio::test]
    async fn version_at_or_below_current_is_rejected() {
        let (facade, fanout, gate) = env();
        let sink = Arc::new(CollectingSink { received: PMutex::new(Vec::new()) });
        let transition = RecordTransition::new(
            "a/1".to_string(),
            Some((1, json!({"x": 1}))),
            facade,
            fanout,
            gate,
            Arc::new(|_: &str| {}),
        );

        let _ = transition.add(sink.clone(), update("a/1", 1, json!({"x": 99})), false);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let received = sink.received.lock();
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            OutboundMessage::VersionExists { current_version: 1, .. }
        ));
    }

    #[tokio::test]
    async fn version_skip_is_invalid() {
        let (facade, fanout, gate) = env();
        let sink = Arc::new(CollectingSink { received: PMutex::new(Vec::new()) });
        let transition = RecordTransition::new(
            "a/1".to_string(),
            Some((0, json!({}))),
            facade,
            fanout,
            gate,
            Arc::new(|_: &str| {}),
        );

        let _ = transition.add(sink.clone(), update("a/1", 5, json!({"x": 1})), false);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let received = sink.received.lock();
        assert_eq!(received.len(), 1);
        assert!(matches!(&received[0], OutboundMessage::InvalidVersion { .. }));
    }

    #[tokio::test]
    async fn upsert_first_step_accepts_supplied_version() {
        let (facade, fanout, gate) = env();
        let sink = Arc::new(CollectingSink { received: PMutex::new(Vec::new()) });
        let transition =
            RecordTransition::new("a/1".to_string(), None, facade, fanout, gate, Arc::new(|_: &str| {}));

        let _ = transition.add(
            sink.clone(),
            InboundMessage::CreateAndUpdate {
                name: "a/1".to_string(),
                version: None,
                data: json!({"x": 1}),
                is_write_ack: false,
                correlation_id: None,
            },
            true,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let received = sink.received.lock();
        assert_eq!(received.len(), 1);
        assert!(matches!(&received[0], OutboundMessage::RecordUpdate { version: 0, .. }));
    }

    #[tokio::test]
    async fn destroy_aborts_pending_write_ack_waiters() {
        let (facade, fanout, gate) = env();
        let sink = Arc::new(CollectingSink { received: PMutex::new(Vec::new()) });
        let transition = RecordTransition::new(
            "a/1".to_string(),
            Some((0, json!({}))),
            facade,
            fanout,
            gate,
            Arc::new(|_: &str| {}),
        );

        transition.destroy();
        let _ = transition.add(
            sink.clone(),
            InboundMessage::Update {
                name: "a/1".to_string(),
                version: 1,
                data: json!({"x": 1}),
                is_write_ack: true,
                correlation_id: None,
            },
            false,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let received = sink.received.lock();
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            OutboundMessage::WriteAcknowledgement { error: Some(_), .. }
        ));
    }

    #[test]
    fn has_version_reflects_accepted_not_committed() {
        let (facade, fanout, gate) = env();
        let transition =
            RecordTransition::new("a/1".to_string(), Some((2, json!({}))), facade, fanout, gate, Arc::new(|_: &str| {}));
        assert!(transition.has_version(2));
        assert!(!transition.has_version(3));
    }

    #[test]
    fn send_version_exists_reports_committed_pair() {
        let (facade, fanout, gate) = env();
        let transition = RecordTransition::new(
            "a/1".to_string(),
            Some((2, json!({"x": 1}))),
            facade,
            fanout,
            gate,
            Arc::new(|_: &str| {}),
        );
        let sink = CollectingSink { received: PMutex::new(Vec::new()) };
        transition.send_version_exists(&sink, Some("cid".to_string()));

        let received = sink.received.lock();
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            OutboundMessage::VersionExists { current_version: 2, correlation_id: Some(c), .. }
                if c == "cid"
        ));
    }

    #[allow(unused)]
    fn _silence_unused(_: SubscriberId) {}

    // Invariant 1 + 6 (§8): the accepted-version sequence has no gaps, and
    // `add`'s classification of a proposed version against the current one
    // follows the `<=` / `== current+1` / otherwise rule exactly, for any
    // sequence of proposed deltas relative to the current version.
    proptest::proptest! {
        #[test]
        fn accepted_version_advances_by_exactly_one_or_is_rejected(deltas in proptest::collection::vec(-2i64..=3, 1..30)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let (facade, fanout, gate) = env();
                let transition = RecordTransition::new(
                    "a/1".to_string(),
                    Some((0, json!({}))),
                    facade,
                    fanout,
                    gate,
                    Arc::new(|_: &str| {}),
                );

                let mut expected_current: i64 = 0;
                for delta in deltas {
                    let proposed = expected_current + delta;
                    if proposed < 0 {
                        continue;
                    }
                    let sink = Arc::new(CollectingSink { received: PMutex::new(Vec::new()) });
                    let accepted = transition.add(sink.clone(), update("a/1", proposed as u64, json!({})), false);
                    proptest::prop_assert!(accepted);

                    let received = sink.received.lock();
                    if proposed <= expected_current {
                        proptest::prop_assert!(matches!(received.first(), Some(OutboundMessage::VersionExists { .. })));
                    } else if proposed == expected_current + 1 {
                        proptest::prop_assert!(received.is_empty());
                        proptest::prop_assert!(transition.has_version(proposed as u64));
                        expected_current = proposed;
                    } else {
                        proptest::prop_assert!(matches!(received.first(), Some(OutboundMessage::InvalidVersion { .. })));
                    }
                }
                Ok(())
            })?;
        }
    }
}
