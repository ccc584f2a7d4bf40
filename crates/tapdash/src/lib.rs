//! # Tapdash
//!
//! Real-time tap-race party game server.
//!
//! One display opens a room and shows a join code; up to 50 phones join
//! it as controllers and race by tapping. The server is authoritative:
//! it counts taps, broadcasts positions, times the race and ranks the
//! finishers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tapdash::prelude::*;
//!
//! # async fn start() -> Result<(), TapdashError> {
//! let server = TapdashServer::builder()
//!     .config(ServerConfig::from_env()?)
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{DEFAULT_HOST, DEFAULT_PORT, ServerConfig};
pub use error::TapdashError;
pub use server::{TapdashServer, TapdashServerBuilder};

/// Everything needed to run a server or write a client against it.
pub mod prelude {
    pub use crate::{ServerConfig, TapdashError, TapdashServer, TapdashServerBuilder};
    pub use tapdash_protocol::{
        ClientRequest, Codec, ColorSlot, Envelope, JsonCodec, Medal, Pattern,
        Payload, Placing, Player, PlayerId, PositionEntry, RaceLength,
        RaceResults, RaceStats, Reply, ReplyFrame, RoomCode, RoomEvent,
        RoomSnapshot, RoomState, SessionId, Settings, SettingsPatch,
    };
    pub use tapdash_room::{RaceTimeouts, RoomConfig, RoomError};
}
