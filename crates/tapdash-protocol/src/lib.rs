//! Wire protocol for tapdash.
//!
//! Defines what the display and controllers exchange with the server:
//!
//! - **Identity** ([`PlayerId`], [`RoomCode`], [`SessionId`])
//! - **Race data** ([`Settings`], [`Player`], [`RaceResults`],
//!   [`RoomState`], [`RoomSnapshot`])
//! - **Messages** ([`ClientRequest`], [`Reply`], [`RoomEvent`]) wrapped in
//!   an [`Envelope`]
//! - **Codec** ([`Codec`] trait, [`JsonCodec`])
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Room (race state)
//! ```

mod codec;
mod error;
mod ids;
mod messages;
mod race;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use ids::{PlayerId, ROOM_CODE_LEN, RoomCode, SessionId};
pub use messages::{ClientRequest, Envelope, Payload, Reply, ReplyFrame, RoomEvent};
pub use race::{
    COLOR_COUNT, ColorSlot, MAX_MEDALS, MIN_MEDALS, Medal, PATTERN_COUNT,
    Pattern, Placing, Player, PositionEntry, RaceLength, RaceResults,
    RaceStats, Recipient, RoomSnapshot, RoomState, SLOT_COUNT, Settings,
    SettingsPatch,
};
