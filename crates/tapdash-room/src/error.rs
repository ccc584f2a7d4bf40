//! Error types for the room layer.

use tapdash_protocol::{PlayerId, RoomCode};
use tapdash_session::SessionError;

/// Errors that can occur during room operations.
///
/// Host-only commands from a non-host and out-of-range settings are not
/// errors: rooms drop them silently so a stale UI never sees a failure.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// No room with this code.
    #[error("room {0} not found")]
    NotFound(RoomCode),

    /// Every player place or identity slot is taken.
    #[error("room {0} is full")]
    RoomFull(RoomCode),

    /// Joins are only accepted in the lobby.
    #[error("room {0} has a race in progress")]
    GameInProgress(RoomCode),

    /// The connection is already a member of this room.
    #[error("player {0} already in room {1}")]
    AlreadyInRoom(PlayerId, RoomCode),

    /// The connection is not a member of this room.
    #[error("player {0} not in room {1}")]
    NotInRoom(PlayerId, RoomCode),

    /// Reconnection failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The room's command channel is full or closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomCode),
}

impl RoomError {
    /// HTTP-style status code carried in `Reply::Error`.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::RoomFull(_)
            | Self::GameInProgress(_)
            | Self::AlreadyInRoom(..) => 409,
            Self::NotInRoom(..) => 400,
            Self::Session(_) => 410,
            Self::Unavailable(_) => 503,
        }
    }
}
