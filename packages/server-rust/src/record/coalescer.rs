//! Record Request Coalescer: single-flight reads over the Storage Facade.
//!
//! §4.3. Concurrent lookups for the same name share one backend round trip;
//! a lookup made on behalf of the permission evaluator is additionally
//! routed through the Stability Gate so it never observes a record mid-write.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use topgun_core::CacheRecord;

use super::facade::StorageFacade;
use super::stability_gate::StabilityGate;

/// Origin of a lookup, distinguishing whether it must wait on the
/// Stability Gate (§4.3: "must route through the Stability Gate when the
/// caller is the permission evaluator").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// A normal client-facing read (READ, HEAD, listen-snapshot, etc.).
    Client,
    /// A read performed to evaluate a permission rule against current data.
    PermissionEvaluator,
}

/// Backend failure surfaced to the caller as `RECORD_LOAD_ERROR` (§6).
#[derive(Debug, Error, Clone)]
#[error("record load failed for {name}: {reason}")]
pub struct RecordLoadError {
    pub name: String,
    pub reason: String,
}

type InFlight = broadcast::Sender<Result<Option<CacheRecord>, RecordLoadError>>;

/// Deduplicates concurrent identical lookups and gates permission-evaluator
/// reads behind the Stability Gate.
pub struct Coalescer {
    facade: Arc<StorageFacade>,
    gate: Arc<StabilityGate>,
    in_flight: Arc<DashMap<String, InFlight>>,
}

impl Coalescer {
    #[must_use]
    pub fn new(facade: Arc<StorageFacade>, gate: Arc<StabilityGate>) -> Self {
        Self {
            facade,
            gate,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Resolves a record by name, sharing one backend fetch across any
    /// callers that arrive while it is outstanding.
    pub async fn load(
        &self,
        name: &str,
        origin: RequestOrigin,
    ) -> Result<Option<CacheRecord>, RecordLoadError> {
        if origin == RequestOrigin::PermissionEvaluator {
            self.gate.wait_until_stable(name).await;
        }

        let mut rx = match self.in_flight.entry(name.to_string()) {
            Entry::Occupied(occupied) => occupied.get().subscribe(),
            Entry::Vacant(vacant) => {
                let (tx, rx) = broadcast::channel(1);
                vacant.insert(tx.clone());
                self.spawn_fetch(name.to_string(), tx);
                rx
            }
        };

        rx.recv().await.unwrap_or_else(|_| {
            Err(RecordLoadError {
                name: name.to_string(),
                reason: "coalesced fetch task dropped its sender".to_string(),
            })
        })
    }

    fn spawn_fetch(&self, name: String, tx: InFlight) {
        let facade = self.facade.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let result = facade.get(&name).await.map_err(|err| RecordLoadError {
                name: name.clone(),
                reason: err.to_string(),
            });
            in_flight.remove(&name);
            let _ = tx.send(result);
        });
    }
}
