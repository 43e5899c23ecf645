//! Inbound and outbound record messages.
//!
//! Per §9's design note ("Tagged variants for actions"), inbound and
//! outbound traffic is modeled as a sum type over [`Action`](crate::Action)
//! with action-specific payload variants, rather than as a single struct
//! with a pile of optional fields. Write-ack wire variants are already
//! collapsed to their base action by the time an [`InboundMessage`] exists
//! — see [`Action::normalize`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Action;

/// Identity and origin of the caller a message was received from.
///
/// Carried alongside a message rather than inside it: the wire envelope
/// (§6) does not include sender identity, but every dispatch-time
/// decision (permissioning, remote-vs-local handling) needs it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderContext {
    /// Authenticated user identifier, if any.
    pub user: Option<String>,
    /// Opaque auth data forwarded to the permission evaluator verbatim.
    pub auth_data: Option<Value>,
    /// Set when the message arrived over the peer message bus rather
    /// than a client socket.
    pub is_remote: bool,
}

/// A single record snapshot: `{ name, version, data }` per §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub name: String,
    pub version: u64,
    pub data: Value,
}

/// The tier-level stored shape, `record = { _v, _d }` per §6 — deliberately
/// unnamed, since the cache/storage capability surfaces key by name
/// externally and store only the version/data pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(rename = "_v")]
    pub version: u64,
    #[serde(rename = "_d")]
    pub data: Value,
}

impl CacheRecord {
    #[must_use]
    pub fn into_snapshot(self, name: String) -> RecordSnapshot {
        RecordSnapshot {
            name,
            version: self.version,
            data: self.data,
        }
    }
}

/// Inbound traffic for the RECORD topic, after write-ack normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SubscribeCreateAndRead {
        name: String,
        correlation_id: Option<String>,
    },
    CreateAndUpdate {
        name: String,
        version: Option<u64>,
        data: Value,
        is_write_ack: bool,
        correlation_id: Option<String>,
    },
    CreateAndPatch {
        name: String,
        version: Option<u64>,
        path: String,
        data: Value,
        is_write_ack: bool,
        correlation_id: Option<String>,
    },
    Read {
        name: String,
        correlation_id: Option<String>,
    },
    Head {
        name: String,
        correlation_id: Option<String>,
    },
    SubscribeAndHead {
        name: String,
        correlation_id: Option<String>,
    },
    Update {
        name: String,
        version: u64,
        data: Value,
        is_write_ack: bool,
        correlation_id: Option<String>,
    },
    Patch {
        name: String,
        version: u64,
        path: String,
        data: Value,
        is_write_ack: bool,
        correlation_id: Option<String>,
    },
    Erase {
        name: String,
        version: u64,
        path: String,
        is_write_ack: bool,
        correlation_id: Option<String>,
    },
    Delete {
        name: String,
        correlation_id: Option<String>,
    },
    /// A remote peer already applied this deletion to its own tiers;
    /// this node only needs to mirror the local effects (§4.8).
    DeleteSuccess {
        name: String,
    },
    Unsubscribe {
        name: String,
    },
    Listen {
        pattern: String,
    },
    Unlisten {
        pattern: String,
    },
    ListenAccept {
        pattern: String,
        name: String,
    },
    ListenReject {
        pattern: String,
        name: String,
    },
}

impl InboundMessage {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        use InboundMessage::*;
        match self {
            SubscribeCreateAndRead { name, .. }
            | CreateAndUpdate { name, .. }
            | CreateAndPatch { name, .. }
            | Read { name, .. }
            | Head { name, .. }
            | SubscribeAndHead { name, .. }
            | Update { name, .. }
            | Patch { name, .. }
            | Erase { name, .. }
            | Delete { name, .. }
            | DeleteSuccess { name }
            | Unsubscribe { name } => Some(name),
            ListenAccept { name, .. } | ListenReject { name, .. } => Some(name),
            Listen { .. } | Unlisten { .. } => None,
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        use InboundMessage::*;
        match self {
            SubscribeCreateAndRead { correlation_id, .. }
            | CreateAndUpdate { correlation_id, .. }
            | CreateAndPatch { correlation_id, .. }
            | Read { correlation_id, .. }
            | Head { correlation_id, .. }
            | SubscribeAndHead { correlation_id, .. }
            | Update { correlation_id, .. }
            | Patch { correlation_id, .. }
            | Erase { correlation_id, .. }
            | Delete { correlation_id, .. } => correlation_id.as_deref(),
            _ => None,
        }
    }
}

/// Outbound traffic produced by the record core.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Broadcast of an accepted full update to a record's subscribers
    /// (§4.5 step 4: "broadcast the original message"). Same wire action
    /// as the inbound `UPDATE` that produced it.
    RecordUpdate {
        name: String,
        version: u64,
        data: Value,
    },
    /// Broadcast of an accepted partial patch, unmerged -- subscribers
    /// apply it the same way the core did.
    RecordPatch {
        name: String,
        version: u64,
        path: String,
        data: Value,
    },
    /// Broadcast of an accepted subtree removal.
    RecordErase {
        name: String,
        version: u64,
        path: String,
    },
    ReadResponse {
        name: String,
        version: u64,
        data: Value,
        correlation_id: Option<String>,
    },
    /// `version` is `-1` when the record does not exist.
    HeadResponse {
        name: String,
        version: i64,
        correlation_id: Option<String>,
    },
    WriteAcknowledgement {
        name: String,
        version: u64,
        /// Canonical string form per §9A — never a structured error object.
        error: Option<String>,
        correlation_id: Option<String>,
    },
    SubscribeAck {
        name: String,
        correlation_id: Option<String>,
    },
    UnsubscribeAck {
        name: String,
    },
    DeleteSuccess {
        name: String,
        correlation_id: Option<String>,
    },
    RecordNotFound {
        name: String,
        correlation_id: Option<String>,
    },
    RecordLoadError {
        name: String,
        error: String,
        original_action: Action,
        correlation_id: Option<String>,
    },
    RecordCreateError {
        name: String,
        error: String,
        correlation_id: Option<String>,
    },
    RecordUpdateError {
        name: String,
        error: String,
        correlation_id: Option<String>,
    },
    RecordDeleteError {
        name: String,
        error: String,
        correlation_id: Option<String>,
    },
    VersionExists {
        name: String,
        current_version: u64,
        current_data: Value,
        correlation_id: Option<String>,
    },
    InvalidVersion {
        name: String,
        current_version: u64,
        correlation_id: Option<String>,
    },
    InvalidPatchOnHotpath {
        name: String,
        correlation_id: Option<String>,
    },
    MessageDenied {
        name: String,
        original_action: Action,
        correlation_id: Option<String>,
    },
    MessagePermissionError {
        name: String,
        original_action: Action,
        correlation_id: Option<String>,
    },
}

impl OutboundMessage {
    #[must_use]
    pub fn action(&self) -> Action {
        use OutboundMessage::*;
        match self {
            RecordUpdate { .. } => Action::Update,
            RecordPatch { .. } => Action::Patch,
            RecordErase { .. } => Action::Erase,
            ReadResponse { .. } => Action::ReadResponse,
            HeadResponse { .. } => Action::HeadResponse,
            WriteAcknowledgement { .. } => Action::WriteAcknowledgement,
            SubscribeAck { .. } => Action::SubscribeAck,
            UnsubscribeAck { .. } => Action::UnsubscribeAck,
            DeleteSuccess { .. } => Action::DeleteSuccess,
            RecordNotFound { .. } => Action::RecordNotFound,
            RecordLoadError { .. } => Action::RecordLoadError,
            RecordCreateError { .. } => Action::RecordCreateError,
            RecordUpdateError { .. } => Action::RecordUpdateError,
            RecordDeleteError { .. } => Action::RecordDeleteError,
            VersionExists { .. } => Action::VersionExists,
            InvalidVersion { .. } => Action::InvalidVersion,
            InvalidPatchOnHotpath { .. } => Action::InvalidPatchOnHotpath,
            MessageDenied { .. } => Action::MessageDenied,
            MessagePermissionError { .. } => Action::MessagePermissionError,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        use OutboundMessage::*;
        match self {
            RecordUpdate { name, .. } | RecordPatch { name, .. } | RecordErase { name, .. } => name,
            ReadResponse { name, .. }
            | HeadResponse { name, .. }
            | WriteAcknowledgement { name, .. }
            | SubscribeAck { name, .. }
            | UnsubscribeAck { name }
            | DeleteSuccess { name, .. }
            | RecordNotFound { name, .. }
            | RecordLoadError { name, .. }
            | RecordCreateError { name, .. }
            | RecordUpdateError { name, .. }
            | RecordDeleteError { name, .. }
            | VersionExists { name, .. }
            | InvalidVersion { name, .. }
            | InvalidPatchOnHotpath { name, .. }
            | MessageDenied { name, .. }
            | MessagePermissionError { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_name_extracts_across_variants() {
        let msg = InboundMessage::Read {
            name: "a/1".to_string(),
            correlation_id: None,
        };
        assert_eq!(msg.name(), Some("a/1"));

        let listen = InboundMessage::Listen {
            pattern: "a/.*".to_string(),
        };
        assert_eq!(listen.name(), None);
    }

    #[test]
    fn outbound_action_matches_variant() {
        let msg = OutboundMessage::VersionExists {
            name: "a/1".to_string(),
            current_version: 1,
            current_data: Value::Null,
            correlation_id: None,
        };
        assert_eq!(msg.action(), Action::VersionExists);
        assert_eq!(msg.name(), "a/1");
    }
}
