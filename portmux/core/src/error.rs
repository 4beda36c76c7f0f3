//! Transport Error Taxonomy
//!
//! Failures are scoped: a [`TransportError`] is terminal for the channel or
//! port it names, never for the runner as a whole (unless that port was the
//! last one alive, in which case the runner shuts down by design, not by
//! error escalation). Handler defects are carried as `anyhow::Error` at the
//! user seam and only ever logged.

use thiserror::Error;

use crate::registry::PortId;

/// Errors produced by the multiplexing transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying channel failed while receiving, or closed without a
    /// CLOSE frame. Terminal for that single channel/port session.
    #[error("Transport receive failed: {0}")]
    Receive(String),

    /// An inbound frame had an unrecognized tag or could not be decoded.
    /// Treated the same as [`TransportError::Receive`] for that port.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A typed payload could not be serialized for the wire
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An outbound message could not be posted
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// An operation was attempted in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A message targeted a port with no live session
    #[error("Unknown port: {0}")]
    UnknownPort(PortId),

    /// The remote side is gone and no further traffic is possible
    #[error("Connection closed")]
    ConnectionClosed,
}
