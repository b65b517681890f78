//! Error types for the portal/session layer.

use crate::message::PortalId;
use crate::transport::TransportError;
use conclave_text::TextError;
use thiserror::Error;

/// Error type for portal operations.
#[derive(Debug, Error)]
pub enum PortalError {
    /// Joining a portal that does not exist.
    #[error("portal not found: {0}")]
    PortalNotFound(PortalId),
    /// Joining a portal whose host has closed it.
    #[error("portal is closed: {0}")]
    PortalClosed(PortalId),
    /// The local portal was disposed while the operation was in flight.
    #[error("portal has been disposed")]
    Disposed,
    /// A broadcast failed. Local optimistic state is never rolled back.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A replication invariant failed; state was left untouched.
    #[error(transparent)]
    Text(#[from] TextError),
    /// A message payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// A join snapshot referenced state it did not carry.
    #[error("snapshot references unknown buffer: {0}")]
    InvalidSnapshot(String),
}

/// Result type for portal operations.
pub type Result<T> = std::result::Result<T, PortalError>;
