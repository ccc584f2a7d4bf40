//! Reconnection management for tapdash.
//!
//! When a controller's connection drops, its room parks the player's last
//! known state here under the client's persistent [`SessionId`]. Presenting
//! the same id within the grace window gives the state back; after that the
//! entry expires and is swept away.
//!
//! ```text
//! Room Layer (above)     ← parks and reclaims player snapshots
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Protocol Layer (below) ← provides SessionId
//! ```
//!
//! [`SessionId`]: tapdash_protocol::SessionId

mod error;
mod manager;
mod session;

pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{Session, SessionConfig, SessionState};
