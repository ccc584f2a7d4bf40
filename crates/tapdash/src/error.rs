//! Unified error type for the tapdash server.

use tapdash_protocol::ProtocolError;
use tapdash_room::RoomError;
use tapdash_session::SessionError;
use tapdash_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TapdashError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, malformed ids).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A reconnection error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A room-level error (full, not found, in progress).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Invalid server configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local I/O, e.g. reading the bound address or installing the signal
    /// handler.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
