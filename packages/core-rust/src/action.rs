//! The record action enum.
//!
//! Dense, well-known, and shared by inbound and outbound messages alike
//! (see the tagged-variant design note this crate's [`crate::message`]
//! module follows). Serializes as a `u16` on the wire rather than as a
//! string, matching the "action (integer from the action enum)" framing
//! of the envelope it appears in.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// One action code, inbound or outbound, for the RECORD topic.
///
/// `*WithWriteAck` variants are wire-level only: [`Action::normalize`]
/// collapses them to their base action plus a write-ack flag before any
/// other component sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Action {
    // Inbound, caller-initiated.
    SubscribeCreateAndRead = 0,
    CreateAndUpdate = 1,
    CreateAndUpdateWithWriteAck = 2,
    CreateAndPatch = 3,
    CreateAndPatchWithWriteAck = 4,
    Read = 5,
    Head = 6,
    SubscribeAndHead = 7,
    Update = 8,
    UpdateWithWriteAck = 9,
    Patch = 10,
    PatchWithWriteAck = 11,
    Erase = 12,
    EraseWithWriteAck = 13,
    Delete = 14,
    /// Also used inbound (remote-originated deletion) and outbound
    /// (acknowledgement to the local requester) — same wire code both ways.
    DeleteSuccess = 15,
    Unsubscribe = 16,
    Listen = 17,
    Unlisten = 18,
    ListenAccept = 19,
    ListenReject = 20,

    // Outbound, core-initiated.
    ReadResponse = 21,
    HeadResponse = 22,
    WriteAcknowledgement = 23,
    SubscribeAck = 24,
    UnsubscribeAck = 25,
    RecordNotFound = 26,
    RecordLoadError = 27,
    RecordCreateError = 28,
    RecordUpdateError = 29,
    RecordDeleteError = 30,
    VersionExists = 31,
    InvalidVersion = 32,
    InvalidPatchOnHotpath = 33,
    MessageDenied = 34,
    MessagePermissionError = 35,

    /// Permission-check-only pseudo-action: never sent on the wire, but
    /// compound actions decompose into a `CREATE` check plus their other
    /// constituent checks (§4.9).
    Create = 36,
}

impl Action {
    /// Strips a `*WithWriteAck` suffix, returning the base action and
    /// whether acknowledgement was requested.
    ///
    /// Per §4.1: "Write-ack variants are normalized to their base action,
    /// with a flag requesting acknowledgement."
    #[must_use]
    pub fn normalize(self) -> (Action, bool) {
        match self {
            Action::CreateAndUpdateWithWriteAck => (Action::CreateAndUpdate, true),
            Action::CreateAndPatchWithWriteAck => (Action::CreateAndPatch, true),
            Action::UpdateWithWriteAck => (Action::Update, true),
            Action::PatchWithWriteAck => (Action::Patch, true),
            Action::EraseWithWriteAck => (Action::Erase, true),
            other => (other, false),
        }
    }

    #[must_use]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Decodes a wire discriminant. `None` for unknown actions — callers
    /// must log and drop per §4.1 ("Unknown actions are logged and dropped").
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Action> {
        use Action::*;
        let action = match code {
            0 => SubscribeCreateAndRead,
            1 => CreateAndUpdate,
            2 => CreateAndUpdateWithWriteAck,
            3 => CreateAndPatch,
            4 => CreateAndPatchWithWriteAck,
            5 => Read,
            6 => Head,
            7 => SubscribeAndHead,
            8 => Update,
            9 => UpdateWithWriteAck,
            10 => Patch,
            11 => PatchWithWriteAck,
            12 => Erase,
            13 => EraseWithWriteAck,
            14 => Delete,
            15 => DeleteSuccess,
            16 => Unsubscribe,
            17 => Listen,
            18 => Unlisten,
            19 => ListenAccept,
            20 => ListenReject,
            21 => ReadResponse,
            22 => HeadResponse,
            23 => WriteAcknowledgement,
            24 => SubscribeAck,
            25 => UnsubscribeAck,
            26 => RecordNotFound,
            27 => RecordLoadError,
            28 => RecordCreateError,
            29 => RecordUpdateError,
            30 => RecordDeleteError,
            31 => VersionExists,
            32 => InvalidVersion,
            33 => InvalidPatchOnHotpath,
            34 => MessageDenied,
            35 => MessagePermissionError,
            36 => Create,
            _ => return None,
        };
        Some(action)
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

struct ActionVisitor;

impl<'de> Visitor<'de> for ActionVisitor {
    type Value = Action;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an action code (u16)")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Action, E> {
        u16::try_from(v)
            .ok()
            .and_then(Action::from_u16)
            .ok_or_else(|| E::custom(format!("unknown action code {v}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Action, E> {
        u16::try_from(v)
            .ok()
            .and_then(Action::from_u16)
            .ok_or_else(|| E::custom(format!("unknown action code {v}")))
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Action, D::Error> {
        deserializer.deserialize_u16(ActionVisitor)
    }
}
