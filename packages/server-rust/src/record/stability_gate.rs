//! Stability Gate: per-record FIFO barrier for permission-triggered reads.
//!
//! §4.4. Backed by the "in-flight request table" from §3: a per-name queue
//! of stability callbacks, present-and-empty meaning one is already
//! outstanding, absent meaning idle.

use std::collections::VecDeque;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

/// FIFO barrier gating reads-from-permission-rules behind prior writes.
///
/// A record's entry in `queues` exists exactly while a write is "in
/// flight" for it: [`StabilityGate::begin_write`] claims the entry (empty
/// queue, no waiters yet) at the start of a Transition step;
/// [`StabilityGate::release`] is called once that step's cache write has
/// acknowledged (§4.5 step 7), popping one queued waiter or, if none
/// queued, clearing the claim back to idle. Readers going through the
/// Coalescer on behalf of the permission evaluator call
/// [`StabilityGate::wait_until_stable`] first (§4.3): an idle name (no
/// entry) proceeds at once; a busy name queues the caller behind the
/// write already in flight, so it never observes a value older than that
/// write's commit.
#[derive(Default)]
pub struct StabilityGate {
    queues: DashMap<String, VecDeque<oneshot::Sender<()>>>,
}

impl StabilityGate {
    #[must_use]
    pub fn new() -> Self {
        Self { queues: DashMap::new() }
    }

    /// Claims the busy slot for `name`, run by a Transition step before it
    /// touches the cache. A no-op if already claimed (a prior step's
    /// `release` left stragglers queued behind it; the new step inherits
    /// the same queue rather than starting a second one).
    pub fn begin_write(&self, name: &str) {
        self.queues.entry(name.to_string()).or_insert_with(VecDeque::new);
    }

    /// `runWhenRecordStable`: an idle name (no entry) proceeds immediately
    /// without installing anything -- there is no write in flight to wait
    /// on, and installing a permanent marker here would never be cleaned
    /// up, since only a writer's `release` ever removes one. A busy name
    /// (claimed by [`Self::begin_write`]) enqueues and waits to be
    /// released in FIFO order.
    pub async fn wait_until_stable(&self, name: &str) {
        let waiter = match self.queues.entry(name.to_string()) {
            Entry::Vacant(_) => None,
            Entry::Occupied(mut occupied) => {
                let (tx, rx) = oneshot::channel();
                occupied.get_mut().push_back(tx);
                Some(rx)
            }
        };
        if let Some(rx) = waiter {
            // The sender side is always held by `release`; a dropped
            // sender (e.g. on shutdown) just unblocks the waiter early.
            let _ = rx.await;
        }
    }

    /// `removeRecordRequest`: absent is a no-op (nothing was claimed);
    /// present-and-empty deletes the claim (no one was waiting, back to
    /// idle); otherwise pops and releases the head waiter, leaving the
    /// claim in place for any waiters still behind it.
    pub fn release(&self, name: &str) {
        let should_remove = match self.queues.get_mut(name) {
            None => return,
            Some(mut queue) => {
                if let Some(tx) = queue.pop_front() {
                    let _ = tx.send(());
                    false
                } else {
                    true
                }
            }
        };
        if should_remove {
            self.queues.remove(name);
        }
    }
}
