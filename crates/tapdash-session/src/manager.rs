//! The session manager: every player parked in one room.
//!
//! Responsibilities:
//! - Parking a player's snapshot when their connection drops
//! - Handing the snapshot back on reconnect within the grace window
//! - Expiring and cleaning up entries whose window has elapsed
//!
//! # Concurrency note
//!
//! `SessionManager` is a plain `HashMap` wrapper. Each room actor owns its
//! own manager, so every access is already serialized by the actor.

use std::collections::HashMap;

use tapdash_protocol::SessionId;
use tokio::time::Instant;

use crate::{Session, SessionConfig, SessionError, SessionState};

/// Grace-window store of parked player snapshots, keyed by the client's
/// persistent session id.
///
/// ## Lifecycle
///
/// ```text
/// park() ──→ [Disconnected] ──→ reclaim() ──→ snapshot handed back
///                  │
///                  ▼ expire_stale()
///             [Expired] ──→ cleanup_expired()
/// ```
///
/// Time is always passed in as `now` so callers control the clock.
#[derive(Debug)]
pub struct SessionManager<T> {
    sessions: HashMap<SessionId, Session<T>>,
    config: SessionConfig,
}

impl<T> SessionManager<T> {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Parks a snapshot and starts its grace window.
    ///
    /// Returns the snapshot previously parked under the same id, if any.
    pub fn park(
        &mut self,
        session_id: SessionId,
        snapshot: T,
        now: Instant,
    ) -> Option<T> {
        tracing::debug!(%session_id, "session parked, grace window started");
        let session = Session {
            session_id: session_id.clone(),
            state: SessionState::Disconnected { since: now },
            snapshot,
        };
        self.sessions
            .insert(session_id, session)
            .map(|old| old.snapshot)
    }

    /// Takes a parked snapshot back out.
    ///
    /// On success the entry is removed, so the same session can be
    /// reclaimed at most once per disconnect.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: nothing parked under this id
    /// - [`SessionError::SessionExpired`]: the grace window has elapsed
    pub fn reclaim(
        &mut self,
        session_id: &SessionId,
        now: Instant,
    ) -> Result<T, SessionError> {
        let grace = self.config.reconnect_grace;
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;

        if session.is_stale(grace, now) {
            session.state = SessionState::Expired;
            return Err(SessionError::SessionExpired(session_id.clone()));
        }

        let session = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        tracing::debug!(%session_id, "session reclaimed");
        Ok(session.snapshot)
    }

    /// Drops a parked entry regardless of its state.
    pub fn discard(&mut self, session_id: &SessionId) -> Option<T> {
        self.sessions.remove(session_id).map(|s| s.snapshot)
    }

    /// Marks every entry whose grace window has elapsed as expired.
    ///
    /// Returns the ids that were expired by this call.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<SessionId> {
        let grace = self.config.reconnect_grace;
        let mut expired = Vec::new();

        for session in self.sessions.values_mut() {
            if matches!(session.state, SessionState::Disconnected { .. })
                && session.is_stale(grace, now)
            {
                session.state = SessionState::Expired;
                expired.push(session.session_id.clone());
                tracing::info!(
                    session_id = %session.session_id,
                    "session expired (grace period elapsed)"
                );
            }
        }

        expired
    }

    /// Removes expired entries. Returns how many were removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| !matches!(s.state, SessionState::Expired));
        before - self.sessions.len()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&Session<T>> {
        self.sessions.get(session_id)
    }

    /// Snapshots still within their grace window, in no particular order.
    pub fn snapshots(&self) -> impl Iterator<Item = &T> {
        self.sessions
            .values()
            .filter(|s| matches!(s.state, SessionState::Disconnected { .. }))
            .map(|s| &s.snapshot)
    }

    /// Mutable access to every parked snapshot, e.g. to reset race stats
    /// on a rematch.
    pub fn snapshots_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.sessions.values_mut().map(|s| &mut s.snapshot)
    }

    /// Number of entries in any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<T> Default for SessionManager<T> {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

// =========================================================================
// Tests
// =========================================================================
