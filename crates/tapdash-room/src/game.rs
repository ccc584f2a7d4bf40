//! The race room state machine.
//!
//! [`Room`] is plain data with synchronous methods. It never sleeps and
//! never sends anything: every mutating call takes the current time and
//! returns the events it produced as `(Recipient, RoomEvent)` pairs. The
//! room actor owns one `Room`, feeds it commands and timer firings in
//! arrival order, and delivers the returned events.
//!
//! Timer-driven calls (`countdown_tick`, `time_out`, `advance_phase`)
//! carry the race epoch they were scheduled for. Starting a race or a
//! rematch bumps the epoch, so a stale firing is a no-op.

use std::collections::HashSet;
use std::time::Duration;

use tapdash_protocol::{
    ColorSlot, Medal, Placing, Player, PlayerId, PositionEntry, RaceResults,
    RaceStats, Recipient, RoomCode, RoomEvent, RoomSnapshot, RoomState,
    SessionId, Settings, SettingsPatch,
};
use tapdash_session::{SessionConfig, SessionManager};
use tokio::time::Instant;

use crate::slots::assign_slot;
use crate::{RoomConfig, RoomError};

/// Events produced by one state machine step.
pub type Outbox = Vec<(Recipient, RoomEvent)>;

/// Longest display name kept, in characters.
pub const MAX_NAME_CHARS: usize = 20;

/// A player admitted to the room, as handed back to the joining client.
#[derive(Debug, Clone)]
pub struct Admission {
    pub player: Player,
    pub room: RoomSnapshot,
}

/// An active player plus the persistent id they rejoin with.
#[derive(Debug, Clone)]
struct Seat {
    player: Player,
    session_id: SessionId,
}

/// One game's players, settings and race lifecycle.
#[derive(Debug)]
pub struct Room {
    code: RoomCode,
    config: RoomConfig,
    host: Option<PlayerId>,
    state: RoomState,
    /// Active players, kept in join order.
    seats: Vec<Seat>,
    /// Players whose connection dropped, keyed by session id.
    parked: SessionManager<Player>,
    settings: Settings,
    /// Finishers of the current race, in arrival order.
    finish_order: Vec<Player>,
    race_started_at: Option<Instant>,
    race_ended_at: Option<Instant>,
    /// Next number the countdown will announce.
    countdown_next: u32,
    epoch: u64,
    next_number: u32,
    created_at: Instant,
    last_activity: Instant,
}

impl Room {
    pub fn new(
        code: RoomCode,
        host: PlayerId,
        config: RoomConfig,
        now: Instant,
    ) -> Self {
        let parked = SessionManager::new(SessionConfig {
            reconnect_grace: config.reconnect_grace,
        });
        Self {
            code,
            config,
            host: Some(host),
            state: RoomState::Lobby,
            seats: Vec::new(),
            parked,
            settings: Settings::default(),
            finish_order: Vec::new(),
            race_started_at: None,
            race_ended_at: None,
            countdown_next: 0,
            epoch: 0,
            next_number: 1,
            created_at: now,
            last_activity: now,
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn host(&self) -> Option<PlayerId> {
        self.host
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn taps_required(&self) -> u32 {
        self.settings.race_length.taps_required()
    }

    pub fn player_count(&self) -> usize {
        self.seats.len()
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.seat(id).map(|s| &s.player)
    }

    /// Active players in join order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.seats.iter().map(|s| &s.player)
    }

    pub fn is_member(&self, id: PlayerId) -> bool {
        self.seat(id).is_some()
    }

    /// Race timeout for the current race length.
    pub fn race_timeout(&self) -> Duration {
        self.config.race_timeouts.get(self.settings.race_length)
    }

    /// Slots held by active and parked players, ascending.
    pub fn taken_slots(&self) -> Vec<ColorSlot> {
        let mut slots: Vec<ColorSlot> = self
            .players()
            .chain(self.parked.snapshots())
            .map(Player::slot)
            .collect();
        slots.sort();
        slots.dedup();
        slots
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_code: self.code.clone(),
            host_id: self.host,
            state: self.state,
            players: self.players().cloned().collect(),
            settings: self.settings,
            taps_required: self.taps_required(),
        }
    }

    // -- Membership ---------------------------------------------------------

    /// Admits a new controller.
    ///
    /// # Errors
    /// - [`RoomError::GameInProgress`] outside the lobby
    /// - [`RoomError::AlreadyInRoom`] if `id` is already seated
    /// - [`RoomError::RoomFull`] at `max_players` or with no free slot
    pub fn join(
        &mut self,
        id: PlayerId,
        session_id: SessionId,
        display_name: Option<&str>,
        requested: Option<ColorSlot>,
        now: Instant,
    ) -> Result<(Admission, Outbox), RoomError> {
        if !self.state.is_joinable() {
            return Err(RoomError::GameInProgress(self.code.clone()));
        }
        if self.is_member(id) {
            return Err(RoomError::AlreadyInRoom(id, self.code.clone()));
        }
        if self.seats.len() >= self.config.max_players {
            return Err(RoomError::RoomFull(self.code.clone()));
        }

        // A fresh join supersedes whatever was parked under this session.
        if self.parked.discard(&session_id).is_some() {
            tracing::debug!(
                room_code = %self.code,
                %session_id,
                "fresh join replaced parked session"
            );
        }

        let taken: HashSet<ColorSlot> = self.taken_slots().into_iter().collect();
        let number = self.next_number;
        let slot = assign_slot(&taken, requested, number)
            .ok_or_else(|| RoomError::RoomFull(self.code.clone()))?;
        if requested.is_some_and(|r| r != slot) {
            tracing::debug!(
                room_code = %self.code,
                %id,
                requested = requested.map(ColorSlot::index),
                assigned = slot.index(),
                "requested slot taken, reassigned"
            );
        }
        self.next_number += 1;

        let player = Player::new(id, display_name_for(display_name, number), number, slot);
        self.seats.push(Seat {
            player: player.clone(),
            session_id,
        });
        self.last_activity = now;

        tracing::info!(
            room_code = %self.code,
            player_id = %id,
            number,
            players = self.seats.len(),
            "player joined"
        );

        let outbox = vec![(
            Recipient::All,
            RoomEvent::PlayerJoined {
                player: player.clone(),
                total_players: self.seats.len(),
            },
        )];
        Ok((
            Admission {
                player,
                room: self.snapshot(),
            },
            outbox,
        ))
    }

    /// Rematerializes a parked player under a new connection id.
    ///
    /// Allowed in any state; race progress, slot and number are kept.
    ///
    /// # Errors
    /// - [`RoomError::AlreadyInRoom`] if `id` is already seated
    /// - [`RoomError::Session`] if nothing is parked under `session_id` or
    ///   its grace window has elapsed
    pub fn reconnect(
        &mut self,
        id: PlayerId,
        session_id: SessionId,
        now: Instant,
    ) -> Result<(Admission, Outbox), RoomError> {
        if self.is_member(id) {
            return Err(RoomError::AlreadyInRoom(id, self.code.clone()));
        }
        let mut player = self.parked.reclaim(&session_id, now)?;
        let old_id = player.id;
        player.id = id;

        for finisher in &mut self.finish_order {
            if finisher.id == old_id {
                finisher.id = id;
            }
        }

        self.seats.push(Seat {
            player: player.clone(),
            session_id,
        });
        self.seats.sort_by_key(|s| s.player.number);
        self.last_activity = now;

        tracing::info!(
            room_code = %self.code,
            player_id = %id,
            %old_id,
            number = player.number,
            "player reconnected"
        );

        let mut outbox = vec![(
            Recipient::All,
            RoomEvent::PlayerReconnected {
                player: player.clone(),
                total_players: self.seats.len(),
            },
        )];
        if self.host.is_none() {
            self.host = Some(id);
            outbox.push((Recipient::All, RoomEvent::HostChanged {
                new_host_id: self.host,
            }));
        }

        Ok((
            Admission {
                player,
                room: self.snapshot(),
            },
            outbox,
        ))
    }

    /// Explicit leave: the player and their progress are dropped.
    /// Idempotent.
    pub fn leave(&mut self, id: PlayerId, now: Instant) -> Outbox {
        self.remove(id, false, now)
    }

    /// Transport loss: the player is parked for the grace window.
    /// Idempotent.
    pub fn disconnect(&mut self, id: PlayerId, now: Instant) -> Outbox {
        self.remove(id, true, now)
    }

    fn remove(&mut self, id: PlayerId, park: bool, now: Instant) -> Outbox {
        let mut outbox = Outbox::new();

        if let Some(index) = self.seats.iter().position(|s| s.player.id == id) {
            let seat = self.seats.remove(index);
            if park {
                self.parked.park(seat.session_id, seat.player, now);
            }
            tracing::info!(
                room_code = %self.code,
                player_id = %id,
                parked = park,
                players = self.seats.len(),
                "player left"
            );
            outbox.push((Recipient::All, RoomEvent::PlayerLeft {
                player_id: id,
                total_players: self.seats.len(),
            }));
        }

        if self.host == Some(id) {
            self.host = self
                .seats
                .iter()
                .min_by_key(|s| s.player.number)
                .map(|s| s.player.id);
            tracing::info!(
                room_code = %self.code,
                old_host = %id,
                new_host = ?self.host,
                "host changed"
            );
            outbox.push((Recipient::All, RoomEvent::HostChanged {
                new_host_id: self.host,
            }));
        }

        if outbox.is_empty() {
            return outbox;
        }
        self.last_activity = now;

        if self.state == RoomState::Racing && self.all_finished() {
            outbox.extend(self.end_race(now));
        }
        outbox
    }

    // -- Host commands ------------------------------------------------------

    /// Applies the valid parts of a settings patch. Lobby only.
    pub fn update_settings(
        &mut self,
        from: PlayerId,
        patch: &SettingsPatch,
        now: Instant,
    ) -> Outbox {
        if !self.is_host(from, "update_settings") {
            return Outbox::new();
        }
        if self.state != RoomState::Lobby {
            tracing::debug!(
                room_code = %self.code,
                state = %self.state,
                "settings locked outside the lobby"
            );
            return Outbox::new();
        }
        if !self.settings.apply(patch) {
            tracing::debug!(room_code = %self.code, ?patch, "settings unchanged");
        }
        self.last_activity = now;
        vec![(Recipient::All, RoomEvent::SettingsUpdated {
            settings: self.settings,
        })]
    }

    /// LOBBY → COUNTDOWN, if enough players are seated.
    pub fn start_race(&mut self, from: PlayerId, now: Instant) -> Outbox {
        if !self.is_host(from, "start_race") {
            return Outbox::new();
        }
        if self.seats.len() < self.config.min_players {
            tracing::debug!(
                room_code = %self.code,
                players = self.seats.len(),
                min = self.config.min_players,
                "not enough players to start"
            );
            return Outbox::new();
        }
        if !self.transition(RoomState::Countdown) {
            return Outbox::new();
        }

        self.epoch += 1;
        self.reset_race_data();
        self.countdown_next = self.config.countdown_from;
        self.last_activity = now;
        vec![(Recipient::All, RoomEvent::CountdownStarted)]
    }

    /// RACING → FINISH, marking everyone unfinished as DNF.
    pub fn force_finish(&mut self, from: PlayerId, now: Instant) -> Outbox {
        if !self.is_host(from, "force_finish") {
            return Outbox::new();
        }
        if self.state != RoomState::Racing {
            return Outbox::new();
        }
        tracing::info!(room_code = %self.code, "host forced the race to end");
        self.last_activity = now;
        self.end_race(now)
    }

    /// Back to the lobby with everyone's stats cleared.
    pub fn rematch(&mut self, from: PlayerId, now: Instant) -> Outbox {
        if !self.is_host(from, "rematch") {
            return Outbox::new();
        }
        if !self.state.is_race_over() {
            tracing::debug!(room_code = %self.code, state = %self.state, "no race to rematch");
            return Outbox::new();
        }
        if !self.transition(RoomState::Lobby) {
            return Outbox::new();
        }
        self.epoch += 1;
        self.reset_race_data();
        self.last_activity = now;
        vec![(Recipient::All, RoomEvent::RematchStarted {
            room: self.snapshot(),
        })]
    }

    // -- Controller input ---------------------------------------------------

    /// Counts one tap. Ignored unless racing and the player is unfinished.
    pub fn tap(&mut self, id: PlayerId, now: Instant) -> Outbox {
        if self.state != RoomState::Racing {
            return Outbox::new();
        }
        let required = self.taps_required();
        let elapsed_ms = self
            .race_started_at
            .map(|start| now.saturating_duration_since(start).as_millis() as u64)
            .unwrap_or(0);
        let rank = self.finish_order.len() as u32 + 1;
        let total_players = self.seats.len();

        let Some(seat) = self.seats.iter_mut().find(|s| s.player.id == id) else {
            return Outbox::new();
        };
        let player = &mut seat.player;
        if player.finished {
            return Outbox::new();
        }
        self.last_activity = now;

        player.taps += 1;
        player.position = progress(player.taps, required);
        if player.taps < required {
            return Outbox::new();
        }

        player.finished = true;
        player.finish_time_ms = Some(elapsed_ms);
        player.finish_position = Some(rank);
        let finisher = player.clone();
        self.finish_order.push(finisher.clone());

        tracing::info!(
            room_code = %self.code,
            player_id = %id,
            rank,
            finish_time_ms = elapsed_ms,
            "player finished"
        );

        let mut outbox = vec![
            (Recipient::Player(id), RoomEvent::PlayerFinished {
                position: rank,
                finish_time_ms: elapsed_ms,
                taps: finisher.taps,
                total_players,
            }),
            (Recipient::All, RoomEvent::SomeoneFinished {
                player_id: id,
                name: finisher.name,
                rank,
            }),
        ];
        if self.all_finished() {
            outbox.extend(self.end_race(now));
        }
        outbox
    }

    // -- Timer firings ------------------------------------------------------

    /// One countdown step: announces the next number; at 0 the race
    /// starts.
    pub fn countdown_tick(&mut self, epoch: u64, now: Instant) -> Outbox {
        if epoch != self.epoch || self.state != RoomState::Countdown {
            tracing::trace!(room_code = %self.code, epoch, "stale countdown tick");
            return Outbox::new();
        }
        let count = self.countdown_next;
        let mut outbox = vec![(Recipient::All, RoomEvent::Countdown { count })];
        if count > 0 {
            self.countdown_next -= 1;
            return outbox;
        }

        if self.transition(RoomState::Racing) {
            self.race_started_at = Some(now);
            self.finish_order.clear();
            outbox.push((Recipient::All, RoomEvent::RaceStarted {
                taps_required: self.taps_required(),
            }));
        }
        outbox
    }

    /// The per-race timeout fired.
    pub fn time_out(&mut self, epoch: u64, now: Instant) -> Outbox {
        if epoch != self.epoch || self.state != RoomState::Racing {
            tracing::trace!(room_code = %self.code, epoch, "stale race timeout");
            return Outbox::new();
        }
        tracing::info!(room_code = %self.code, "race timed out");
        self.end_race(now)
    }

    /// FINISH → PODIUM → RESULTS.
    pub fn advance_phase(&mut self, epoch: u64) -> Outbox {
        if epoch != self.epoch {
            return Outbox::new();
        }
        let next = match self.state {
            RoomState::Finish => RoomState::Podium,
            RoomState::Podium => RoomState::Results,
            _ => return Outbox::new(),
        };
        if !self.transition(next) {
            return Outbox::new();
        }
        vec![(Recipient::All, RoomEvent::StateChanged { state: next })]
    }

    /// Periodic position broadcast. Empty outside a race.
    pub fn position_update(&self) -> Outbox {
        if self.state != RoomState::Racing {
            return Outbox::new();
        }
        vec![(Recipient::All, RoomEvent::PositionUpdate {
            positions: self.positions(),
        })]
    }

    /// Active players sorted by descending position (join order breaks
    /// ties).
    pub fn positions(&self) -> Vec<PositionEntry> {
        let mut entries: Vec<&Player> = self.players().collect();
        entries.sort_by(|a, b| b.position.total_cmp(&a.position));
        entries
            .into_iter()
            .map(|p| PositionEntry {
                id: p.id,
                position: p.position,
                taps: p.taps,
                finished: p.finished,
            })
            .collect()
    }

    // -- Sweep --------------------------------------------------------------

    /// Purges expired parked players and reports whether the room itself
    /// should be deleted.
    pub fn sweep(&mut self, now: Instant) -> bool {
        self.parked.expire_stale(now);
        let purged = self.parked.cleanup_expired();
        if purged > 0 {
            tracing::debug!(room_code = %self.code, purged, "purged expired sessions");
        }

        let age = now.saturating_duration_since(self.created_at);
        let idle = now.saturating_duration_since(self.last_activity);
        let abandoned = self.seats.is_empty()
            && self.parked.is_empty()
            && age > self.config.empty_retention;
        let inactive = idle > self.config.inactivity_limit;
        if abandoned || inactive {
            tracing::info!(
                room_code = %self.code,
                abandoned,
                inactive,
                age_secs = age.as_secs(),
                idle_secs = idle.as_secs(),
                "room marked for deletion"
            );
        }
        abandoned || inactive
    }

    // -- Results ------------------------------------------------------------

    pub fn results(&self) -> RaceResults {
        let medal_count = self.settings.medal_count;
        let finish_order: Vec<Placing> = self
            .finish_order
            .iter()
            .enumerate()
            .map(|(i, player)| Placing {
                player: player.clone(),
                medal: Medal::for_rank(i, medal_count),
            })
            .collect();
        let dnf: Vec<Player> = self.players().filter(|p| p.dnf).cloned().collect();
        let duration_ms = match (self.race_started_at, self.race_ended_at) {
            (Some(start), Some(end)) => {
                end.saturating_duration_since(start).as_millis() as u64
            }
            _ => 0,
        };

        RaceResults {
            race_stats: RaceStats {
                duration_ms,
                total_players: self.seats.len(),
                finished_count: finish_order.len(),
                dnf_count: dnf.len(),
                race_length: self.settings.race_length.label().to_string(),
            },
            finish_order,
            dnf,
        }
    }

    // -- Internals ----------------------------------------------------------

    fn seat(&self, id: PlayerId) -> Option<&Seat> {
        self.seats.iter().find(|s| s.player.id == id)
    }

    fn is_host(&self, from: PlayerId, command: &'static str) -> bool {
        if self.host == Some(from) {
            return true;
        }
        tracing::debug!(
            room_code = %self.code,
            player_id = %from,
            command,
            "ignoring host-only command from non-host"
        );
        false
    }

    fn all_finished(&self) -> bool {
        self.seats.iter().all(|s| s.player.finished)
    }

    fn transition(&mut self, next: RoomState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::debug!(
                room_code = %self.code,
                from = %self.state,
                to = %next,
                "invalid transition ignored"
            );
            return false;
        }
        tracing::info!(room_code = %self.code, from = %self.state, to = %next, "room state changed");
        self.state = next;
        true
    }

    /// Marks unfinished players DNF and moves to FINISH.
    fn end_race(&mut self, now: Instant) -> Outbox {
        if !self.transition(RoomState::Finish) {
            return Outbox::new();
        }
        let active = self.seats.iter_mut().map(|s| &mut s.player);
        for player in active.chain(self.parked.snapshots_mut()) {
            if !player.finished {
                player.finished = true;
                player.dnf = true;
                player.finish_time_ms = None;
            }
        }
        self.race_ended_at = Some(now);

        let results = self.results();
        tracing::info!(
            room_code = %self.code,
            finished = results.race_stats.finished_count,
            dnf = results.race_stats.dnf_count,
            "race ended"
        );
        vec![(Recipient::All, RoomEvent::RaceEnded { results })]
    }

    fn reset_race_data(&mut self) {
        let active = self.seats.iter_mut().map(|s| &mut s.player);
        for player in active.chain(self.parked.snapshots_mut()) {
            player.reset_race_stats();
        }
        self.finish_order.clear();
        self.race_started_at = None;
        self.race_ended_at = None;
    }
}

/// Percentage of the race completed, capped at 100.
fn progress(taps: u32, required: u32) -> f64 {
    if required == 0 {
        return 100.0;
    }
    (f64::from(taps) / f64::from(required) * 100.0).min(100.0)
}

/// Trimmed, capped name, or `Player {number}` when blank.
fn display_name_for(raw: Option<&str>, number: u32) -> String {
    let name: String = raw
        .map(str::trim)
        .unwrap_or_default()
        .chars()
        .take(MAX_NAME_CHARS)
        .collect();
    if name.is_empty() {
        format!("Player {number}")
    } else {
        name
    }
}
