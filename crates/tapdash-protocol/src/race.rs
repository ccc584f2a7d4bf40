//! Race data shared by the room and every client: settings, players,
//! positions, results and the room state enum.

use std::fmt;
use std::str::FromStr;

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{PlayerId, ProtocolError, RoomCode};

// ---------------------------------------------------------------------------
// Race length
// ---------------------------------------------------------------------------

/// How long a race is. Determines the taps needed to cross the line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RaceLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl RaceLength {
    pub const ALL: [RaceLength; 3] =
        [RaceLength::Short, RaceLength::Medium, RaceLength::Long];

    /// Taps needed to reach 100%.
    pub fn taps_required(self) -> u32 {
        match self {
            Self::Short => 180,
            Self::Medium => 300,
            Self::Long => 600,
        }
    }

    pub fn meters(self) -> u32 {
        match self {
            Self::Short => 60,
            Self::Medium => 100,
            Self::Long => 200,
        }
    }

    /// Human label shown on the results screen.
    pub fn label(self) -> &'static str {
        match self {
            Self::Short => "60m Sprint",
            Self::Medium => "100m Classic",
            Self::Long => "200m Endurance",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

impl fmt::Display for RaceLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RaceLength {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "medium" => Ok(Self::Medium),
            "long" => Ok(Self::Long),
            _ => Err(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

pub const MIN_MEDALS: u8 = 1;
pub const MAX_MEDALS: u8 = 10;

/// Host-controlled race settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub race_length: RaceLength,
    /// How many finishers receive a medal or ordinal label (1..=10).
    pub medal_count: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            race_length: RaceLength::Medium,
            medal_count: 3,
        }
    }
}

impl Settings {
    /// Applies the valid parts of a patch and ignores the rest.
    ///
    /// An unknown race length or an out-of-range medal count leaves that
    /// field untouched. Returns whether anything changed.
    pub fn apply(&mut self, patch: &SettingsPatch) -> bool {
        let before = *self;
        if let Some(length) = patch.race_length.as_deref() {
            if let Ok(length) = length.parse::<RaceLength>() {
                self.race_length = length;
            }
        }
        if let Some(count) = patch.medal_count {
            if (i64::from(MIN_MEDALS)..=i64::from(MAX_MEDALS)).contains(&count) {
                self.medal_count = count as u8;
            }
        }
        *self != before
    }
}

/// A partial settings update as sent by the host.
///
/// Fields are loosely typed so a bad value is dropped instead of failing
/// the whole frame.
///
/// Numbers may arrive as strings or with a fraction (`"5"`, `3.5`); they
/// are read like `parseInt`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, deserialize_with = "loose_string")]
    pub race_length: Option<String>,
    #[serde(default, deserialize_with = "loose_int")]
    pub medal_count: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(i64),
    Float(f64),
    Text(String),
    // Arrays, objects and booleans are dropped.
    #[allow(dead_code)]
    Other(IgnoredAny),
}

fn loose_int<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Loose>::deserialize(de)? {
        Some(Loose::Int(n)) => Some(n),
        Some(Loose::Float(f)) if f.is_finite() => Some(f.trunc() as i64),
        Some(Loose::Text(text)) => leading_int(&text),
        _ => None,
    })
}

fn loose_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Loose>::deserialize(de)? {
        Some(Loose::Text(text)) => Some(text),
        _ => None,
    })
}

/// The integer prefix of `text`, e.g. `" 4 medals"` → 4.
fn leading_int(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    let digits = unsigned.bytes().take_while(u8::is_ascii_digit).count();
    let end = text.len() - unsigned.len() + digits;
    text[..end].parse().ok()
}

// ---------------------------------------------------------------------------
// Visual identity slots
// ---------------------------------------------------------------------------

pub const COLOR_COUNT: u8 = 10;
pub const PATTERN_COUNT: u8 = 5;
/// Total number of (color, pattern) combinations.
pub const SLOT_COUNT: u8 = COLOR_COUNT * PATTERN_COUNT;

/// Runner pattern, in slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    Solid,
    Striped,
    Dotted,
    Checker,
    Diagonal,
}

impl Pattern {
    pub const ALL: [Pattern; 5] = [
        Pattern::Solid,
        Pattern::Striped,
        Pattern::Dotted,
        Pattern::Checker,
        Pattern::Diagonal,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }
}

/// One (color, pattern) combination, numbered `pattern * 10 + color`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct ColorSlot(u8);

impl ColorSlot {
    /// # Errors
    /// Returns [`ProtocolError::InvalidSlot`] if `index >= 50`.
    pub fn new(index: u8) -> Result<Self, ProtocolError> {
        if index < SLOT_COUNT {
            Ok(Self(index))
        } else {
            Err(ProtocolError::InvalidSlot(index))
        }
    }

    /// Builds the slot for a color index (taken modulo 10) and pattern.
    pub fn from_parts(color_index: u8, pattern: Pattern) -> Self {
        Self(pattern.index() * COLOR_COUNT + color_index % COLOR_COUNT)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn color_index(self) -> u8 {
        self.0 % COLOR_COUNT
    }

    pub fn pattern(self) -> Pattern {
        // `self.0 < 50`, so the division is always a valid pattern index.
        Pattern::from_index(self.0 / COLOR_COUNT).unwrap_or(Pattern::Solid)
    }
}

impl TryFrom<u8> for ColorSlot {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ColorSlot> for u8 {
    fn from(slot: ColorSlot) -> Self {
        slot.0
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// A player as every client sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// 1-based join order, stable for the room's lifetime.
    pub number: u32,
    pub color_index: u8,
    pub pattern: Pattern,
    /// Percentage of the race completed, 0..=100.
    pub position: f64,
    pub taps: u32,
    pub finished: bool,
    pub dnf: bool,
    /// Milliseconds from the start gun to crossing the line.
    pub finish_time_ms: Option<u64>,
    /// 1-based arrival rank.
    pub finish_position: Option<u32>,
}

impl Player {
    pub fn new(id: PlayerId, name: String, number: u32, slot: ColorSlot) -> Self {
        Self {
            id,
            name,
            number,
            color_index: slot.color_index(),
            pattern: slot.pattern(),
            position: 0.0,
            taps: 0,
            finished: false,
            dnf: false,
            finish_time_ms: None,
            finish_position: None,
        }
    }

    pub fn slot(&self) -> ColorSlot {
        ColorSlot::from_parts(self.color_index, self.pattern)
    }

    /// Clears everything a race writes; identity fields stay.
    pub fn reset_race_stats(&mut self) {
        self.position = 0.0;
        self.taps = 0;
        self.finished = false;
        self.dnf = false;
        self.finish_time_ms = None;
        self.finish_position = None;
    }
}

/// One row of a position broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub id: PlayerId,
    pub position: f64,
    pub taps: u32,
    pub finished: bool,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Award for a finishing rank.
///
/// The first three are pictorial medals; ranks 4 and up within the medal
/// count get a plain ordinal label like `"4th"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Medal {
    Gold,
    Silver,
    Bronze,
    Ordinal(u8),
}

impl Medal {
    /// The award for a 0-based finish index, if it falls within
    /// `medal_count`.
    pub fn for_rank(index: usize, medal_count: u8) -> Option<Self> {
        if index >= usize::from(medal_count) {
            return None;
        }
        Some(match index {
            0 => Self::Gold,
            1 => Self::Silver,
            2 => Self::Bronze,
            // medal_count <= 10, so the rank fits in a u8.
            n => Self::Ordinal((n + 1) as u8),
        })
    }
}

impl fmt::Display for Medal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gold => f.write_str("gold"),
            Self::Silver => f.write_str("silver"),
            Self::Bronze => f.write_str("bronze"),
            Self::Ordinal(n) => write!(f, "{n}th"),
        }
    }
}

impl TryFrom<String> for Medal {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "gold" => Ok(Self::Gold),
            "silver" => Ok(Self::Silver),
            "bronze" => Ok(Self::Bronze),
            other => other
                .strip_suffix("th")
                .and_then(|n| n.parse().ok())
                .map(Self::Ordinal)
                .ok_or_else(|| format!("unknown medal {other:?}")),
        }
    }
}

impl From<Medal> for String {
    fn from(medal: Medal) -> Self {
        medal.to_string()
    }
}

/// A finisher with their award.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placing {
    pub player: Player,
    pub medal: Option<Medal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceStats {
    pub duration_ms: u64,
    pub total_players: usize,
    pub finished_count: usize,
    pub dnf_count: usize,
    /// Race-length label, e.g. "60m Sprint".
    pub race_length: String,
}

/// Final standings broadcast with `RaceEnded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResults {
    /// Finishers in arrival order.
    pub finish_order: Vec<Placing>,
    /// Players who did not finish.
    pub dnf: Vec<Player>,
    pub race_stats: RaceStats,
}

// ---------------------------------------------------------------------------
// Room state
// ---------------------------------------------------------------------------

/// The race lifecycle of a room.
///
/// Transitions only move forward within a race cycle; the single way back
/// to `Lobby` is a rematch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomState {
    #[default]
    Lobby,
    Countdown,
    Racing,
    Finish,
    Podium,
    Results,
}

impl RoomState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: RoomState) -> bool {
        use RoomState::*;
        matches!(
            (self, next),
            (Lobby, Countdown)
                | (Countdown, Racing)
                | (Racing, Finish)
                | (Finish, Podium)
                | (Podium, Results)
                | (Finish | Podium | Results, Lobby)
        )
    }

    /// New players may only join in the lobby.
    pub fn is_joinable(self) -> bool {
        self == RoomState::Lobby
    }

    /// States a rematch may be requested from.
    pub fn is_race_over(self) -> bool {
        matches!(self, RoomState::Finish | RoomState::Podium | RoomState::Results)
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lobby => "LOBBY",
            Self::Countdown => "COUNTDOWN",
            Self::Racing => "RACING",
            Self::Finish => "FINISH",
            Self::Podium => "PODIUM",
            Self::Results => "RESULTS",
        };
        f.write_str(s)
    }
}

/// Everything a client needs to render a room it just entered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_code: RoomCode,
    pub host_id: Option<PlayerId>,
    pub state: RoomState,
    /// Active players in join order.
    pub players: Vec<Player>,
    pub settings: Settings,
    pub taps_required: u32,
}

/// Who should receive a room event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every subscriber of the room, host display included.
    All,
    /// One subscriber.
    Player(PlayerId),
}
