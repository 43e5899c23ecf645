//! The record-handling core (see the crate-level `SPEC_FULL.md`):
//! dispatch, per-record write serialization, cache-first coalesced reads,
//! the hot-path bypass, deletion, and the supporting storage/permission/
//! subscription trait surfaces they're built on.

pub mod cache;
pub mod coalescer;
pub mod config;
pub mod deletion;
pub mod durable;
pub mod error;
pub mod facade;
pub mod fanout;
pub mod handler;
pub mod hot_path;
pub mod permission;
pub mod registry;
pub mod stability_gate;
pub mod transition;

pub use cache::{Cache, InMemoryCache};
pub use coalescer::{Coalescer, RecordLoadError, RequestOrigin};
pub use config::RecordConfig;
pub use deletion::DeletionCoordinator;
pub use durable::{DurableStore, InMemoryDurableStore, NullDurableStore};
pub use error::PermissionError;
pub use facade::StorageFacade;
pub use fanout::FanoutAdapter;
pub use handler::RecordHandler;
pub use hot_path::HotPathWriter;
pub use permission::{evaluate, AllowAllEvaluator, DenyAllEvaluator, PermissionEvaluator};
pub use registry::{
    InMemorySubscriptionRegistry, ListenerRegistry, MessageSink, SubscriberId, SubscriberIdAllocator,
    SubscriptionRegistry,
};
pub use stability_gate::StabilityGate;
pub use transition::RecordTransition;
