//! `TopGun` Core -- the record action/message model and the patch pointer
//! grammar shared between the record-handling core and anything talking
//! to it over the wire.
//!
//! - **Action** ([`action`]): the dense record action enum, wire-coded as `u16`
//! - **Message** ([`message`]): tagged-variant inbound/outbound record messages
//! - **Pointer** ([`pointer`]): dot/bracket path grammar for record patches and erases

pub mod action;
pub mod message;
pub mod pointer;

pub use action::Action;
pub use message::{CacheRecord, InboundMessage, OutboundMessage, RecordSnapshot, SenderContext};
pub use pointer::{apply_erase, apply_patch, PointerError};
