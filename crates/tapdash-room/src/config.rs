//! Room configuration: player limits, timer cadences, retention windows.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tapdash_protocol::{RaceLength, SLOT_COUNT};

// ---------------------------------------------------------------------------
// RaceTimeouts
// ---------------------------------------------------------------------------

/// How long a race may run before unfinished players are marked DNF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceTimeouts {
    pub short: Duration,
    pub medium: Duration,
    pub long: Duration,
}

impl RaceTimeouts {
    pub fn get(&self, length: RaceLength) -> Duration {
        match length {
            RaceLength::Short => self.short,
            RaceLength::Medium => self.medium,
            RaceLength::Long => self.long,
        }
    }
}

impl Default for RaceTimeouts {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(2 * 60),
            medium: Duration::from_secs(3 * 60),
            long: Duration::from_secs(6 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Configuration shared by every room a registry creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Players needed before the host may start.
    pub min_players: usize,

    /// Hard cap on active players. Never above the 50 identity slots.
    pub max_players: usize,

    /// How long a dropped controller keeps its place and progress.
    pub reconnect_grace: Duration,

    /// An empty room older than this is swept.
    pub empty_retention: Duration,

    /// Any room idle for longer than this is swept, occupied or not.
    pub inactivity_limit: Duration,

    /// First number of the countdown; it runs down to 0.
    pub countdown_from: u32,

    pub countdown_interval: Duration,

    /// Cadence of position broadcasts while racing.
    pub broadcast_interval: Duration,

    /// FINISH → PODIUM delay.
    pub finish_delay: Duration,

    /// PODIUM → RESULTS delay.
    pub podium_duration: Duration,

    pub race_timeouts: RaceTimeouts,

    /// Capacity of each room actor's command channel.
    pub channel_size: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: usize::from(SLOT_COUNT),
            reconnect_grace: Duration::from_secs(5 * 60),
            empty_retention: Duration::from_secs(60 * 60),
            inactivity_limit: Duration::from_secs(2 * 60 * 60),
            countdown_from: 3,
            countdown_interval: Duration::from_secs(1),
            broadcast_interval: Duration::from_millis(50),
            finish_delay: Duration::from_secs(1),
            podium_duration: Duration::from_secs(5),
            race_timeouts: RaceTimeouts::default(),
            channel_size: 256,
        }
    }
}

impl RoomConfig {
    /// Clamps values that would break the room's invariants.
    pub fn validated(mut self) -> Self {
        let slots = usize::from(SLOT_COUNT);
        if self.max_players == 0 || self.max_players > slots {
            tracing::warn!(
                max_players = self.max_players,
                slots,
                "max_players out of range, clamping"
            );
            self.max_players = self.max_players.clamp(1, slots);
        }
        self.min_players = self.min_players.clamp(1, self.max_players);
        self.channel_size = self.channel_size.max(1);
        self
    }
}
