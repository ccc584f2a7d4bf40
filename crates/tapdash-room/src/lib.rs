//! Race rooms for tapdash.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns the
//! race state machine and its timers.
//!
//! # Key types
//!
//! - [`Room`]: the pure state machine (lobby, countdown, race, podium)
//! - [`RoomRegistry`]: creates rooms under random codes and sweeps stale ones
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`RoomConfig`]: player limits, timer cadences, retention windows

mod config;
mod error;
mod game;
mod manager;
mod room;
mod slots;

pub use config::{RaceTimeouts, RoomConfig};
pub use error::RoomError;
pub use game::{Admission, MAX_NAME_CHARS, Outbox, Room};
pub use manager::RoomRegistry;
pub use room::{PlayerSender, RoomHandle, RoomInfo};
