//! Portal-scoped wire messages and join snapshots.
//!
//! Messages travel as opaque `serde_json` payloads through the transport.
//! Delivery is at-least-once with per-sender ordering only, so every
//! message is designed to be applied idempotently.

use conclave_text::{EditOperation, MarkerId, Selection, SelectionSet, SiteId, TextSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a portal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortalId(pub String);

impl PortalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh portal id.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl std::fmt::Display for PortalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an editor, scoped to the site that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EditorId {
    pub site: SiteId,
    pub seq: u32,
}

impl std::fmt::Display for EditorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.site, self.seq)
    }
}

/// Membership state of a site, retained for the life of the portal so
/// stale messages from departed sites can be ignored safely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipStatus {
    Active,
    Left,
    Disconnected,
}

/// Messages exchanged between the sites of one portal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    /// A site created a buffer; carries full state so receivers can build
    /// a replica without a fetch round trip.
    BufferCreated { uri: String, state: TextSnapshot },
    /// A site created an editor on an existing buffer.
    EditorCreated {
        id: EditorId,
        buffer_uri: String,
        selections: Vec<(SiteId, SelectionSet)>,
        selection_seqs: Vec<(SiteId, u32)>,
    },
    /// One splice against a buffer.
    Edit { uri: String, op: EditOperation },
    /// A site rewrote some of its selections. `None` deletes the marker.
    SelectionUpdate {
        editor: EditorId,
        site: SiteId,
        seq: u32,
        changes: HashMap<MarkerId, Option<Selection>>,
    },
    /// The active editor switched (or cleared, when `editor` is `None`).
    ActiveEditorChanged { editor: Option<EditorId> },
    /// A site joined, left, or dropped off the portal.
    MembershipChanged {
        site: SiteId,
        status: MembershipStatus,
    },
    /// The host closed the portal; every guest tears down its replicas.
    PortalClosed,
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Full current state of a buffer, as carried by a join snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferSnapshot {
    pub uri: String,
    pub state: TextSnapshot,
}

/// Full current state of an editor, as carried by a join snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EditorSnapshot {
    pub id: EditorId,
    pub buffer_uri: String,
    pub selections: Vec<(SiteId, SelectionSet)>,
    pub selection_seqs: Vec<(SiteId, u32)>,
}

/// Everything a guest needs to replicate a portal at join time. A
/// snapshot of current state, never a replay of history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalSnapshot {
    pub sites: Vec<(SiteId, MembershipStatus)>,
    pub buffers: Vec<BufferSnapshot>,
    pub editors: Vec<EditorSnapshot>,
    pub active_editor: Option<EditorId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_text::{Point, Range, Selection};

    #[test]
    fn test_message_round_trip() {
        let mut changes = HashMap::new();
        changes.insert(
            1,
            Some(Selection::spanning(Range::new(
                Point::new(0, 2),
                Point::new(0, 4),
            ))),
        );
        changes.insert(2, None);

        let message = Message::SelectionUpdate {
            editor: EditorId {
                site: SiteId(1),
                seq: 1,
            },
            site: SiteId(3),
            seq: 7,
            changes,
        };

        let payload = message.encode().unwrap();
        let decoded = Message::decode(&payload).unwrap();
        match decoded {
            Message::SelectionUpdate {
                site, seq, changes, ..
            } => {
                assert_eq!(site, SiteId(3));
                assert_eq!(seq, 7);
                assert_eq!(changes.len(), 2);
                assert!(changes[&2].is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_portal_closed_round_trip() {
        let payload = Message::PortalClosed.encode().unwrap();
        assert!(matches!(
            Message::decode(&payload).unwrap(),
            Message::PortalClosed
        ));
    }
}
