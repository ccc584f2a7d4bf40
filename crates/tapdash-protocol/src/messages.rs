//! Messages exchanged between the gateway and its clients.
//!
//! Three families travel inside an [`Envelope`]:
//!
//! - [`ClientRequest`]: display or controller → server.
//! - [`Reply`]: the server's answer to one request, correlated by the
//!   request's `seq`.
//! - [`RoomEvent`]: server pushes to everyone subscribed to a room.
//!
//! All three are internally tagged (`{"type": "Tap", ...}`), and the
//! [`Payload`] wrapping them is adjacently tagged
//! (`{"type": "Request", "data": {...}}`).

use serde::{Deserialize, Serialize};

use crate::{
    ColorSlot, Player, PlayerId, PositionEntry, RaceResults, RoomCode,
    RoomSnapshot, RoomState, SessionId, Settings, SettingsPatch,
};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Everything a client can ask of the server.
///
/// Host-only commands (`UpdateSettings`, `StartRace`, `ForceFinish`,
/// `RequestRematch`) act on the room the connection hosts and carry no
/// room code. From anyone else they are silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    // -- Display --
    /// Open a new room with this connection as host.
    CreateRoom,
    UpdateSettings { settings: SettingsPatch },
    StartRace,
    ForceFinish,
    RequestRematch,

    // -- Controller --
    /// Which slots are taken, for the color picker.
    GetRoomInfo { room_code: RoomCode },
    JoinRoom {
        room_code: RoomCode,
        #[serde(default)]
        display_name: Option<String>,
        /// Requested (color, pattern). Re-validated server-side.
        #[serde(default)]
        color_slot: Option<ColorSlot>,
        session_id: SessionId,
    },
    Reconnect {
        room_code: RoomCode,
        session_id: SessionId,
    },
    /// Fire-and-forget. Progress is counted, not timed.
    Tap { room_code: RoomCode },
    LeaveRoom { room_code: RoomCode },

    // -- Either --
    /// Current view of the connection's room.
    GetState,
    /// Keep-alive. Echoed back with the server clock.
    Heartbeat { client_time: u64 },
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// The server's answer to a [`ClientRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Reply {
    RoomCreated {
        room_code: RoomCode,
        join_url: String,
        settings: Settings,
    },
    RoomInfo {
        taken_slots: Vec<ColorSlot>,
        player_count: usize,
    },
    Joined {
        player: Player,
        room: RoomSnapshot,
    },
    Reconnected {
        player: Player,
        room: RoomSnapshot,
    },
    /// No parked session matched, or its grace window ran out. The client
    /// should fall back to a normal join.
    ReconnectFailed { reason: String },
    State { room: RoomSnapshot },
    HeartbeatAck {
        client_time: u64,
        server_time: u64,
    },
    /// `code` follows HTTP conventions (400, 404, 409, 410, 503).
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Pushed by a room to its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomEvent {
    PlayerJoined {
        player: Player,
        total_players: usize,
    },
    PlayerLeft {
        player_id: PlayerId,
        total_players: usize,
    },
    PlayerReconnected {
        player: Player,
        total_players: usize,
    },
    HostChanged { new_host_id: Option<PlayerId> },
    SettingsUpdated { settings: Settings },
    CountdownStarted,
    /// 3, 2, 1, then 0 as the start gun.
    Countdown { count: u32 },
    RaceStarted { taps_required: u32 },
    /// Sorted by descending position.
    PositionUpdate { positions: Vec<PositionEntry> },
    /// Unicast to the player who just crossed the line.
    PlayerFinished {
        position: u32,
        finish_time_ms: u64,
        taps: u32,
        total_players: usize,
    },
    SomeoneFinished {
        player_id: PlayerId,
        name: String,
        rank: u32,
    },
    RaceEnded { results: RaceResults },
    /// Timer-driven FINISH → PODIUM → RESULTS steps.
    StateChanged { state: RoomState },
    RematchStarted { room: RoomSnapshot },
    /// The room was swept or the server is shutting down.
    RoomClosed,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A reply tied to the request that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    /// The `seq` of the request envelope.
    pub in_reply_to: u64,
    pub body: Reply,
}

/// The content of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    Request(ClientRequest),
    Reply(ReplyFrame),
    Event(RoomEvent),
}

/// The top-level message wrapper. Every frame on the wire is an Envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-sender counter. Replies echo the request's value in
    /// [`ReplyFrame::in_reply_to`].
    pub seq: u64,
    /// Milliseconds since the sender started. Optional from clients.
    #[serde(default)]
    pub timestamp: u64,
    pub payload: Payload,
}
