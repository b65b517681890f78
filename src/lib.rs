//! Umbrella crate for the portal session core.
//!
//! Re-exports the public surface of the two member crates so applications
//! depend on one name: `conclave-text` for the replicated buffer and
//! selection model, `conclave-session` for portals, membership, and
//! transport. The binary target is a scripted demo of both.

pub use conclave_session::{
    BufferDelegate, BufferProxy, BufferSnapshot, ConnectionEvent, EditorDelegate, EditorId,
    EditorProxy, EditorSnapshot, Envelope, JoinResponse, LocalSessionService, MembershipStatus,
    MemoryBus, Message, Portal, PortalClient, PortalDelegate, PortalError, PortalId,
    PortalSnapshot, PortalState, PortalTransport, Result, SessionService, SiteRegistry,
    TransportError,
};
pub use conclave_text::{
    extent_of, index_for_point, point_for_index, CharId, EditOperation, InsertRun, MarkerId, OpId,
    Point, Range, Selection, SelectionSet, SiteId, TextChange, TextCrdt, TextError, TextSnapshot,
};
