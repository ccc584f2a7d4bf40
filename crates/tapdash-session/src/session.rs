//! Session types: one parked player and the policy that bounds it.

use std::time::Duration;

use tapdash_protocol::SessionId;
use tokio::time::Instant;

/// Configuration for the reconnection window.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a disconnected player may take to come back.
    ///
    /// Default: 5 minutes.
    pub reconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_grace: Duration::from_secs(5 * 60),
        }
    }
}

/// Where a parked session is in its lifecycle.
///
/// ```text
///   Disconnected ──(grace elapsed)──→ Expired ──→ cleanup
///        │
///        └──(reclaim)──→ handed back to the room, entry removed
/// ```
///
/// Uses tokio's `Instant` so paused-clock tests can drive expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Parked at the given instant; reclaimable until
    /// `since + reconnect_grace`.
    Disconnected { since: Instant },

    /// Grace elapsed; waiting for `cleanup_expired`.
    Expired,
}

/// A parked player: the persistent id and whatever the room needs to
/// rematerialize them.
#[derive(Debug, Clone)]
pub struct Session<T> {
    pub session_id: SessionId,
    pub state: SessionState,
    pub snapshot: T,
}

impl<T> Session<T> {
    /// Whether the grace window has run out at `now`.
    pub fn is_stale(&self, grace: Duration, now: Instant) -> bool {
        match self.state {
            SessionState::Disconnected { since } => {
                now.saturating_duration_since(since) > grace
            }
            SessionState::Expired => true,
        }
    }
}
