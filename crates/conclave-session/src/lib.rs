//! Portal/session layer for real-time collaborative editing.
//!
//! A host opens a [`Portal`] and shares buffers and editors into it;
//! guests join through a [`SessionService`] and receive live replicas.
//! All replication flows through a pluggable [`PortalTransport`]; the
//! in-memory [`MemoryBus`] serves tests and single-process simulation.
//!
//! The application integrates by attaching delegates ([`PortalDelegate`],
//! [`BufferDelegate`], [`EditorDelegate`]) to the proxies it cares about.
//! Delegates are held weakly and never notified about a site's own local
//! operations on its own buffer.

pub mod buffer;
pub mod client;
pub mod editor;
pub mod error;
pub mod message;
pub mod portal;
pub mod registry;
pub mod service;
pub mod transport;

pub use buffer::{BufferDelegate, BufferProxy};
pub use client::PortalClient;
pub use editor::{EditorDelegate, EditorProxy};
pub use error::{PortalError, Result};
pub use message::{
    BufferSnapshot, EditorId, EditorSnapshot, MembershipStatus, Message, PortalId, PortalSnapshot,
};
pub use portal::{Portal, PortalDelegate, PortalState};
pub use registry::SiteRegistry;
pub use service::{JoinResponse, LocalSessionService, SessionService};
pub use transport::{ConnectionEvent, Envelope, MemoryBus, PortalTransport, TransportError};
