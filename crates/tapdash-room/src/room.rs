//! Room actor: an isolated Tokio task that owns one [`Room`].
//!
//! Each room runs in its own task, communicating with the outside world
//! through an mpsc channel. Commands and timer firings are handled one at
//! a time in a single `select!` loop, so the state machine never sees
//! concurrent mutation.

use std::collections::HashMap;

use tapdash_protocol::{
    ColorSlot, PlayerId, Recipient, RoomCode, RoomEvent, RoomSnapshot,
    RoomState, SessionId, SettingsPatch,
};
use tapdash_tick::{Deadline, TickScheduler};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::game::{Admission, Outbox, Room};
use crate::{RoomConfig, RoomError};

/// Channel sender for delivering room events to one connection.
pub type PlayerSender = mpsc::UnboundedSender<RoomEvent>;

/// Commands sent to a room actor through its channel.
///
/// Variants with a `oneshot::Sender` expect an answer; the rest are
/// fire-and-forget.
pub(crate) enum RoomCommand {
    Info {
        reply: oneshot::Sender<RoomInfo>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    Join {
        player_id: PlayerId,
        session_id: SessionId,
        display_name: Option<String>,
        color_slot: Option<ColorSlot>,
        sender: PlayerSender,
        reply: oneshot::Sender<Result<Admission, RoomError>>,
    },
    Reconnect {
        player_id: PlayerId,
        session_id: SessionId,
        sender: PlayerSender,
        reply: oneshot::Sender<Result<Admission, RoomError>>,
    },
    Leave {
        player_id: PlayerId,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        player_id: PlayerId,
    },
    UpdateSettings {
        from: PlayerId,
        patch: SettingsPatch,
    },
    StartRace {
        from: PlayerId,
    },
    ForceFinish {
        from: PlayerId,
    },
    Rematch {
        from: PlayerId,
    },
    Tap {
        player_id: PlayerId,
    },
    Sweep {
        now: Instant,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// What a controller sees before joining.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_code: RoomCode,
    pub state: RoomState,
    /// Slots held by active and parked players.
    pub taken_slots: Vec<ColorSlot>,
    pub player_count: usize,
    pub max_players: usize,
}

/// Handle to a running room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    room_code: RoomCode,
    sender: mpsc::Sender<RoomCommand>,
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle")
            .field("room_code", &self.room_code)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl RoomHandle {
    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    /// `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Info { reply }).await
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    /// Joins as a new controller. `sender` receives every room event
    /// from now on.
    pub async fn join(
        &self,
        player_id: PlayerId,
        session_id: SessionId,
        display_name: Option<String>,
        color_slot: Option<ColorSlot>,
        sender: PlayerSender,
    ) -> Result<Admission, RoomError> {
        self.request(|reply| RoomCommand::Join {
            player_id,
            session_id,
            display_name,
            color_slot,
            sender,
            reply,
        })
        .await?
    }

    /// Restores a parked player under a new connection.
    pub async fn reconnect(
        &self,
        player_id: PlayerId,
        session_id: SessionId,
        sender: PlayerSender,
    ) -> Result<Admission, RoomError> {
        self.request(|reply| RoomCommand::Reconnect {
            player_id,
            session_id,
            sender,
            reply,
        })
        .await?
    }

    /// Explicit leave. Waits until the room has processed it.
    pub async fn leave(&self, player_id: PlayerId) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Leave { player_id, reply })
            .await
    }

    /// Transport loss: parks the player (or transfers host).
    pub async fn disconnect(&self, player_id: PlayerId) -> Result<(), RoomError> {
        self.send(RoomCommand::Disconnect { player_id }).await
    }

    /// [`disconnect`](Self::disconnect) for callers that cannot await,
    /// such as `Drop`.
    ///
    /// A full command queue never loses the report: it is handed to a task
    /// that waits for capacity.
    pub fn disconnect_detached(&self, player_id: PlayerId) {
        let cmd = RoomCommand::Disconnect { player_id };
        let cmd = match self.sender.try_send(cmd) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(cmd)) => cmd,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    room_code = %self.room_code,
                    %player_id,
                    "room gone, disconnect dropped"
                );
                return;
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let sender = self.sender.clone();
                runtime.spawn(async move {
                    let _ = sender.send(cmd).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    room_code = %self.room_code,
                    %player_id,
                    "no runtime to deliver disconnect"
                );
            }
        }
    }

    pub async fn update_settings(
        &self,
        from: PlayerId,
        patch: SettingsPatch,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::UpdateSettings { from, patch }).await
    }

    pub async fn start_race(&self, from: PlayerId) -> Result<(), RoomError> {
        self.send(RoomCommand::StartRace { from }).await
    }

    pub async fn force_finish(&self, from: PlayerId) -> Result<(), RoomError> {
        self.send(RoomCommand::ForceFinish { from }).await
    }

    pub async fn rematch(&self, from: PlayerId) -> Result<(), RoomError> {
        self.send(RoomCommand::Rematch { from }).await
    }

    pub async fn tap(&self, player_id: PlayerId) -> Result<(), RoomError> {
        self.send(RoomCommand::Tap { player_id }).await
    }

    /// Purges expired sessions; `true` means the room should be deleted.
    pub async fn sweep(&self, now: Instant) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::Sweep { now, reply }).await
    }

    /// Tells the room to notify its subscribers and stop.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Shutdown).await
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RoomError::Unavailable(self.room_code.clone()))
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> RoomCommand,
    ) -> Result<R, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_code.clone()))
    }
}

/// Timers that drive a room through a race.
///
/// Every timer is idle outside the states that need it, so the actor can
/// select over all of them unconditionally.
struct RaceClock {
    countdown: TickScheduler,
    broadcast: TickScheduler,
    /// Armed with the race epoch when racing starts.
    race_timeout: Deadline<u64>,
    /// FINISH → PODIUM and PODIUM → RESULTS.
    phase: Deadline<u64>,
}

impl RaceClock {
    fn new(config: &RoomConfig) -> Self {
        Self {
            countdown: TickScheduler::with_period(config.countdown_interval),
            broadcast: TickScheduler::with_period(config.broadcast_interval),
            race_timeout: Deadline::pending(),
            phase: Deadline::pending(),
        }
    }

    fn stop_all(&mut self) {
        self.countdown.stop();
        self.broadcast.stop();
        self.race_timeout.disarm();
        self.phase.disarm();
    }
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor {
    room: Room,
    /// Event subscribers: the host display and every seated controller.
    senders: HashMap<PlayerId, PlayerSender>,
    clock: RaceClock,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl RoomActor {
    async fn run(mut self) {
        tracing::info!(room_code = %self.room.code(), "room actor started");

        loop {
            let before = self.room.state();
            let epoch = self.room.epoch();
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                _ = self.clock.countdown.wait_for_tick() => {
                    let outbox = self.room.countdown_tick(epoch, Instant::now());
                    self.dispatch(outbox);
                }
                info = self.clock.broadcast.wait_for_tick() => {
                    tracing::trace!(room_code = %self.room.code(), tick = info.tick, "position broadcast");
                    let outbox = self.room.position_update();
                    self.dispatch(outbox);
                }
                fired = self.clock.race_timeout.wait() => {
                    let outbox = self.room.time_out(fired, Instant::now());
                    self.dispatch(outbox);
                }
                fired = self.clock.phase.wait() => {
                    let outbox = self.room.advance_phase(fired);
                    self.dispatch(outbox);
                }
            }
            self.sync_clock(before, epoch);
        }

        self.clock.stop_all();
        tracing::info!(room_code = %self.room.code(), "room actor stopped");
    }

    /// Returns `false` when the actor should stop.
    fn handle_command(&mut self, cmd: RoomCommand) -> bool {
        let now = Instant::now();
        match cmd {
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.room.snapshot());
            }
            RoomCommand::Join {
                player_id,
                session_id,
                display_name,
                color_slot,
                sender,
                reply,
            } => {
                let result = self.room.join(
                    player_id,
                    session_id,
                    display_name.as_deref(),
                    color_slot,
                    now,
                );
                let result = result.map(|(admission, outbox)| {
                    self.senders.insert(player_id, sender);
                    self.dispatch(outbox);
                    admission
                });
                let _ = reply.send(result);
            }
            RoomCommand::Reconnect {
                player_id,
                session_id,
                sender,
                reply,
            } => {
                let result = self
                    .room
                    .reconnect(player_id, session_id, now)
                    .map(|(admission, outbox)| {
                        self.senders.insert(player_id, sender);
                        self.dispatch(outbox);
                        admission
                    });
                let _ = reply.send(result);
            }
            RoomCommand::Leave { player_id, reply } => {
                self.senders.remove(&player_id);
                let outbox = self.room.leave(player_id, now);
                self.dispatch(outbox);
                let _ = reply.send(());
            }
            RoomCommand::Disconnect { player_id } => {
                self.senders.remove(&player_id);
                let outbox = self.room.disconnect(player_id, now);
                self.dispatch(outbox);
            }
            RoomCommand::UpdateSettings { from, patch } => {
                let outbox = self.room.update_settings(from, &patch, now);
                self.dispatch(outbox);
            }
            RoomCommand::StartRace { from } => {
                let outbox = self.room.start_race(from, now);
                self.dispatch(outbox);
            }
            RoomCommand::ForceFinish { from } => {
                let outbox = self.room.force_finish(from, now);
                self.dispatch(outbox);
            }
            RoomCommand::Rematch { from } => {
                let outbox = self.room.rematch(from, now);
                self.dispatch(outbox);
            }
            RoomCommand::Tap { player_id } => {
                let outbox = self.room.tap(player_id, now);
                self.dispatch(outbox);
            }
            RoomCommand::Sweep { now, reply } => {
                let doomed = self.room.sweep(now);
                let _ = reply.send(doomed);
                if doomed {
                    self.close();
                    return false;
                }
            }
            RoomCommand::Shutdown => {
                tracing::info!(room_code = %self.room.code(), "room shutting down");
                self.close();
                return false;
            }
        }
        true
    }

    /// Re-arms timers after a step that changed the state or the epoch.
    fn sync_clock(&mut self, before: RoomState, epoch: u64) {
        let state = self.room.state();
        if state == before && self.room.epoch() == epoch {
            return;
        }
        let now = Instant::now();
        let epoch = self.room.epoch();
        let config = self.room.config();
        let clock = &mut self.clock;

        match state {
            RoomState::Lobby => clock.stop_all(),
            RoomState::Countdown => {
                clock.stop_all();
                clock.countdown.start();
            }
            RoomState::Racing => {
                clock.countdown.stop();
                clock.broadcast.start();
                let timeout = self.room.race_timeout();
                clock.race_timeout.arm(now + timeout, epoch);
                tracing::debug!(
                    room_code = %self.room.code(),
                    timeout_secs = timeout.as_secs(),
                    "race timeout armed"
                );
            }
            RoomState::Finish => {
                clock.broadcast.stop();
                clock.race_timeout.disarm();
                clock.phase.arm(now + config.finish_delay, epoch);
            }
            RoomState::Podium => {
                clock.phase.arm(now + config.podium_duration, epoch);
            }
            RoomState::Results => {
                clock.phase.disarm();
            }
        }
    }

    /// Delivers events, dropping subscribers whose connection is gone.
    fn dispatch(&mut self, outbox: Outbox) {
        for (recipient, event) in outbox {
            match recipient {
                Recipient::All => {
                    self.senders.retain(|player_id, sender| {
                        let alive = sender.send(event.clone()).is_ok();
                        if !alive {
                            tracing::debug!(%player_id, "dropping closed subscriber");
                        }
                        alive
                    });
                }
                Recipient::Player(player_id) => {
                    if let Some(sender) = self.senders.get(&player_id) {
                        if sender.send(event).is_err() {
                            self.senders.remove(&player_id);
                        }
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        self.clock.stop_all();
        self.dispatch(vec![(Recipient::All, RoomEvent::RoomClosed)]);
        self.senders.clear();
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_code: self.room.code().clone(),
            state: self.room.state(),
            taken_slots: self.room.taken_slots(),
            player_count: self.room.player_count(),
            max_players: self.room.config().max_players,
        }
    }
}

/// Spawns a room actor owned by `host_id`, whose display receives events
/// through `host_sender`.
pub(crate) fn spawn_room(
    room_code: RoomCode,
    host_id: PlayerId,
    host_sender: PlayerSender,
    config: RoomConfig,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.channel_size);
    let clock = RaceClock::new(&config);
    let room = Room::new(room_code.clone(), host_id, config, Instant::now());

    let mut senders = HashMap::new();
    senders.insert(host_id, host_sender);

    let actor = RoomActor {
        room,
        senders,
        clock,
        receiver: rx,
    };
    tokio::spawn(actor.run());

    RoomHandle {
        room_code,
        sender: tx,
    }
}
