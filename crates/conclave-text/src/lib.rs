//! # conclave-text
//!
//! Replicated text data structures for Conclave portals.
//!
//! This crate provides:
//! - A fragment-based text CRDT ([`TextCrdt`]) with deterministic
//!   convergence and idempotent remote application
//! - Row/column coordinates ([`Point`], [`Range`]) and traversal arithmetic
//! - The per-site selection model ([`Selection`]) and its transformation
//!   rules under concurrent edits
//!
//! ## Example
//!
//! ```rust
//! use conclave_text::{SiteId, TextCrdt};
//!
//! let mut host = TextCrdt::new(SiteId(1));
//! host.splice(0, 0, "hello world").unwrap();
//!
//! let mut guest = TextCrdt::from_snapshot(SiteId(2), host.snapshot());
//!
//! // Concurrent edits on both replicas...
//! let host_op = host.splice(5, 0, ", dear").unwrap();
//! let guest_op = guest.splice(0, 5, "howdy").unwrap();
//!
//! // ...converge regardless of delivery order.
//! host.integrate(&guest_op).unwrap();
//! guest.integrate(&host_op).unwrap();
//! assert_eq!(host.text(), guest.text());
//! ```

pub mod buffer;
pub mod point;
pub mod selection;

pub use buffer::{
    CharId, EditOperation, Fragment, InsertRun, OpId, SiteId, TextChange, TextCrdt, TextError,
    TextSnapshot,
};
pub use point::{extent_of, index_for_point, point_for_index, Point, Range};
pub use selection::{MarkerId, Selection, SelectionSet};
