//! Error types for the protocol layer.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, an
    /// unknown `type` tag, or a field that fails validation (such as a
    /// malformed room code).
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A room code that is not six ASCII letters or digits.
    #[error("invalid room code {0:?}")]
    InvalidRoomCode(String),

    /// A session id that is empty or too long.
    #[error("invalid session id")]
    InvalidSessionId,

    /// A color slot outside `0..50`.
    #[error("color slot {0} out of range")]
    InvalidSlot(u8),
}
