//! `TopGun` Server -- the record-handling core: dispatch, per-record
//! write serialization, cache-first coalesced reads, the hot-path write
//! bypass, deletion, subscription fan-out, and permissioning.

pub mod record;

pub use record::RecordHandler;
