//! Identity types: players, rooms and persistent sessions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tapdash_transport::ConnectionId;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// PlayerId
// ---------------------------------------------------------------------------

/// Identifies a live connection's player within a room.
///
/// Derived from the transport's [`ConnectionId`], so it changes when a
/// controller reconnects. The stable identity is the [`SessionId`].
///
/// `#[serde(transparent)]` keeps it a plain number on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

impl From<ConnectionId> for PlayerId {
    fn from(id: ConnectionId) -> Self {
        Self(id.into_inner())
    }
}

// ---------------------------------------------------------------------------
// RoomCode
// ---------------------------------------------------------------------------

/// Length of every room code.
pub const ROOM_CODE_LEN: usize = 6;

/// A six-character alphanumeric room code, always stored uppercase.
///
/// Input is case-insensitive: `"abc123"` and `"ABC123"` parse to the same
/// code. Anything else (wrong length, punctuation, non-ASCII) is rejected,
/// including during deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Parses and canonicalizes a room code.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidRoomCode`] if `raw` is not exactly
    /// six ASCII letters or digits.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.len() != ROOM_CODE_LEN
            || !trimmed.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(ProtocolError::InvalidRoomCode(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// The canonical uppercase form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

const MAX_SESSION_ID_LEN: usize = 128;

/// The controller's persistent session identifier.
///
/// Generated by the client and kept in its local storage, so it survives
/// page reloads and dropped connections. Opaque to the server apart from
/// basic length checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// # Errors
    /// Returns [`ProtocolError::InvalidSessionId`] for an empty (after
    /// trimming) or over-long id.
    pub fn new(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_SESSION_ID_LEN {
            return Err(ProtocolError::InvalidSessionId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&PlayerId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_player_id_display() {
        assert_eq!(PlayerId(7).to_string(), "P-7");
    }

    #[test]
    fn test_player_id_from_connection_id() {
        assert_eq!(PlayerId::from(ConnectionId::new(9)), PlayerId(9));
    }

    #[test]
    fn test_room_code_parse_canonicalizes_to_uppercase() {
        let code = RoomCode::parse("abC12z").unwrap();
        assert_eq!(code.as_str(), "ABC12Z");
        assert_eq!(code, "ABC12Z".parse().unwrap());
    }

    #[test]
    fn test_room_code_parse_trims_whitespace() {
        assert_eq!(RoomCode::parse(" abc123 ").unwrap().as_str(), "ABC123");
    }

    #[test]
    fn test_room_code_parse_rejects_bad_input() {
        for bad in ["", "ABC12", "ABC1234", "ABC-12", "ÄBC123"] {
            assert!(
                matches!(
                    RoomCode::parse(bad),
                    Err(ProtocolError::InvalidRoomCode(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_room_code_deserializes_case_insensitively() {
        let code: RoomCode = serde_json::from_str("\"xyz789\"").unwrap();
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"XYZ789\"");
    }

    #[test]
    fn test_room_code_deserialize_rejects_malformed() {
        let result: Result<RoomCode, _> = serde_json::from_str("\"nope\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_session_id_rejects_empty_and_long() {
        assert!(SessionId::new("   ").is_err());
        assert!(SessionId::new("x".repeat(129)).is_err());
        assert_eq!(SessionId::new(" s-1 ").unwrap().as_str(), "s-1");
    }
}
