//! Error types for the session layer.

use tapdash_protocol::SessionId;

/// Errors that can occur when reclaiming a parked session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Nothing is parked under this session id. Either the player never
    /// joined this room, already reconnected, or left on purpose.
    #[error("no parked session {0}")]
    NotFound(SessionId),

    /// The session was parked, but its grace window has elapsed.
    #[error("session {0} expired")]
    SessionExpired(SessionId),
}
