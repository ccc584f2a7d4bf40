//! Per-connection handler: request dispatch and event forwarding.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The connection's id doubles as its [`PlayerId`]. One loop selects over
//! three sources:
//!   1. frames from the client → decode → dispatch a [`ClientRequest`]
//!   2. events from the room this connection hosts or plays in → forward
//!   3. the idle timer → close the connection as a transport loss, unless
//!      the peer has sent any frame (pings included) in the meantime

use std::sync::Arc;

use tapdash_protocol::{
    ClientRequest, Codec, Envelope, Payload, PlayerId, Reply, ReplyFrame,
    RoomCode, RoomEvent, Settings,
};
use tapdash_room::{PlayerSender, RoomError, RoomHandle};
use tapdash_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::TapdashError;
use crate::server::ServerState;

/// The room a connection belongs to, if any.
///
/// [`release`](Self::release) reports the transport loss to the room and
/// waits until it is queued, so the player is parked for reconnection (or
/// the host role moves on). Dropping a guard that was never released
/// (early error return, panic) reports it without waiting.
struct MembershipGuard {
    player_id: PlayerId,
    room: Option<RoomHandle>,
}

impl MembershipGuard {
    fn room(&self) -> Option<&RoomHandle> {
        self.room.as_ref()
    }

    /// The room, if `code` names it.
    fn room_named(&self, code: &RoomCode) -> Option<&RoomHandle> {
        self.room.as_ref().filter(|room| room.room_code() == code)
    }

    fn enter(&mut self, room: RoomHandle) {
        self.room = Some(room);
    }

    /// Forgets the room without notifying it.
    fn clear(&mut self) {
        self.room = None;
    }

    async fn release(mut self) {
        if let Some(room) = self.room.take() {
            if let Err(e) = room.disconnect(self.player_id).await {
                tracing::debug!(
                    player_id = %self.player_id,
                    error = %e,
                    "could not report disconnect"
                );
            }
        }
    }
}

impl Drop for MembershipGuard {
    fn drop(&mut self) {
        if let Some(room) = self.room.take() {
            room.disconnect_detached(self.player_id);
        }
    }
}

/// Per-connection outbound state.
struct Outbound<'a, C: Codec> {
    conn: &'a WebSocketConnection,
    state: &'a ServerState<C>,
    seq: u64,
}

impl<C: Codec> Outbound<'_, C> {
    async fn send(&mut self, payload: Payload) -> Result<(), TapdashError> {
        let envelope = Envelope {
            seq: self.seq,
            timestamp: self.state.elapsed_ms(),
            payload,
        };
        self.seq += 1;
        let bytes = self.state.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn reply(&mut self, in_reply_to: u64, body: Reply) -> Result<(), TapdashError> {
        self.send(Payload::Reply(ReplyFrame { in_reply_to, body })).await
    }

    async fn error(
        &mut self,
        in_reply_to: u64,
        code: u16,
        message: impl Into<String>,
    ) -> Result<(), TapdashError> {
        let body = Reply::Error {
            code,
            message: message.into(),
        };
        self.reply(in_reply_to, body).await
    }

    async fn room_error(
        &mut self,
        in_reply_to: u64,
        err: &RoomError,
    ) -> Result<(), TapdashError> {
        self.error(in_reply_to, err.code(), err.to_string()).await
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), TapdashError> {
    let player_id = PlayerId::from(conn.id());
    tracing::debug!(%player_id, peer = ?conn.peer_addr(), "handling new connection");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<RoomEvent>();
    let mut guard = MembershipGuard {
        player_id,
        room: None,
    };
    let mut out = Outbound {
        conn: &conn,
        state: state.as_ref(),
        seq: 1,
    };

    let idle_timeout = state.config.idle_timeout;
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            received = conn.recv() => {
                let data = match received {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(%player_id, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%player_id, error = %e, "recv error");
                        break;
                    }
                };
                idle.as_mut().reset(Instant::now() + idle_timeout);

                let envelope: Envelope = match state.codec.decode(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::debug!(%player_id, error = %e, "failed to decode envelope");
                        out.error(0, 400, format!("invalid message: {e}")).await?;
                        continue;
                    }
                };

                match envelope.payload {
                    Payload::Request(request) => {
                        handle_request(
                            &mut out,
                            &mut guard,
                            &events_tx,
                            player_id,
                            envelope.seq,
                            request,
                        )
                        .await?;
                    }
                    Payload::Reply(_) | Payload::Event(_) => {
                        tracing::debug!(%player_id, "ignoring server-bound payload from client");
                    }
                }
            }
            Some(event) = events_rx.recv() => {
                let closed = matches!(event, RoomEvent::RoomClosed);
                out.send(Payload::Event(event)).await?;
                if closed {
                    guard.clear();
                }
            }
            () = &mut idle => {
                // Pings keep the connection alive without reaching recv.
                let last_seen = conn.last_seen();
                if last_seen.elapsed() < idle_timeout {
                    idle.as_mut().reset(last_seen + idle_timeout);
                    continue;
                }
                tracing::info!(%player_id, "connection idle, closing");
                break;
            }
        }
    }

    let _ = conn.close().await;
    guard.release().await;
    Ok(())
}

/// Dispatches one request.
async fn handle_request<C: Codec>(
    out: &mut Outbound<'_, C>,
    guard: &mut MembershipGuard,
    events: &PlayerSender,
    player_id: PlayerId,
    seq: u64,
    request: ClientRequest,
) -> Result<(), TapdashError> {
    match request {
        ClientRequest::CreateRoom => {
            if let Some(room) = guard.room() {
                let err = RoomError::AlreadyInRoom(player_id, room.room_code().clone());
                return out.room_error(seq, &err).await;
            }
            let room = out
                .state
                .rooms
                .lock()
                .await
                .create_room(player_id, events.clone());
            let room_code = room.room_code().clone();
            let join_url = format!("{}/play/{}", out.state.config.base_url, room_code);
            guard.enter(room);
            out.reply(seq, Reply::RoomCreated {
                room_code,
                join_url,
                settings: Settings::default(),
            })
            .await?;
        }

        ClientRequest::UpdateSettings { settings } => {
            if let Some(room) = guard.room() {
                let result = room.update_settings(player_id, settings).await;
                forget_if_gone(guard, result);
            }
        }
        ClientRequest::StartRace => {
            if let Some(room) = guard.room() {
                let result = room.start_race(player_id).await;
                forget_if_gone(guard, result);
            }
        }
        ClientRequest::ForceFinish => {
            if let Some(room) = guard.room() {
                let result = room.force_finish(player_id).await;
                forget_if_gone(guard, result);
            }
        }
        ClientRequest::RequestRematch => {
            if let Some(room) = guard.room() {
                let result = room.rematch(player_id).await;
                forget_if_gone(guard, result);
            }
        }

        ClientRequest::GetRoomInfo { room_code } => {
            let info = match lookup(out, &room_code).await {
                Ok(room) => room.info().await,
                Err(e) => Err(e),
            };
            match info {
                Ok(info) => {
                    out.reply(seq, Reply::RoomInfo {
                        taken_slots: info.taken_slots,
                        player_count: info.player_count,
                    })
                    .await?;
                }
                Err(e) => out.room_error(seq, &e).await?,
            }
        }

        ClientRequest::JoinRoom {
            room_code,
            display_name,
            color_slot,
            session_id,
        } => {
            if let Some(room) = guard.room() {
                let err = RoomError::AlreadyInRoom(player_id, room.room_code().clone());
                return out.room_error(seq, &err).await;
            }
            let room = match lookup(out, &room_code).await {
                Ok(room) => room,
                Err(e) => return out.room_error(seq, &e).await,
            };
            let joined = room
                .join(player_id, session_id, display_name, color_slot, events.clone())
                .await;
            match joined {
                Ok(admission) => {
                    guard.enter(room);
                    out.reply(seq, Reply::Joined {
                        player: admission.player,
                        room: admission.room,
                    })
                    .await?;
                }
                Err(e) => {
                    tracing::debug!(%player_id, %room_code, error = %e, "join rejected");
                    out.room_error(seq, &e).await?;
                }
            }
        }

        ClientRequest::Reconnect {
            room_code,
            session_id,
        } => {
            if let Some(room) = guard.room() {
                let err = RoomError::AlreadyInRoom(player_id, room.room_code().clone());
                return out.room_error(seq, &err).await;
            }
            let reconnected = match lookup(out, &room_code).await {
                Ok(room) => room
                    .reconnect(player_id, session_id, events.clone())
                    .await
                    .map(|admission| (room, admission)),
                Err(e) => Err(e),
            };
            match reconnected {
                Ok((room, admission)) => {
                    guard.enter(room);
                    out.reply(seq, Reply::Reconnected {
                        player: admission.player,
                        room: admission.room,
                    })
                    .await?;
                }
                Err(e) => {
                    tracing::debug!(%player_id, %room_code, error = %e, "reconnect failed");
                    out.reply(seq, Reply::ReconnectFailed {
                        reason: e.to_string(),
                    })
                    .await?;
                }
            }
        }

        ClientRequest::Tap { room_code } => match guard.room_named(&room_code) {
            Some(room) => {
                let result = room.tap(player_id).await;
                forget_if_gone(guard, result);
            }
            None => {
                let err = RoomError::NotInRoom(player_id, room_code);
                out.room_error(seq, &err).await?;
            }
        },

        ClientRequest::LeaveRoom { room_code } => {
            let Some(room) = guard.room_named(&room_code).cloned() else {
                let err = RoomError::NotInRoom(player_id, room_code);
                return out.room_error(seq, &err).await;
            };
            guard.clear();
            if let Err(e) = room.leave(player_id).await {
                tracing::debug!(%player_id, error = %e, "leave failed");
            }
        }

        ClientRequest::GetState => {
            let snapshot = match guard.room() {
                Some(room) => Some(room.snapshot().await),
                None => None,
            };
            match snapshot {
                Some(Ok(room)) => out.reply(seq, Reply::State { room }).await?,
                Some(Err(e)) => {
                    guard.clear();
                    out.room_error(seq, &e).await?;
                }
                None => out.error(seq, 400, "not in a room").await?,
            }
        }

        ClientRequest::Heartbeat { client_time } => {
            let server_time = out.state.elapsed_ms();
            out.reply(seq, Reply::HeartbeatAck {
                client_time,
                server_time,
            })
            .await?;
        }
    }

    Ok(())
}

async fn lookup<C: Codec>(
    out: &Outbound<'_, C>,
    code: &RoomCode,
) -> Result<RoomHandle, RoomError> {
    out.state.rooms.lock().await.lookup(code)
}

/// Fire-and-forget commands fail only when the room is gone.
fn forget_if_gone(guard: &mut MembershipGuard, result: Result<(), RoomError>) {
    if let Err(e) = result {
        tracing::debug!(player_id = %guard.player_id, error = %e, "room gone");
        guard.clear();
    }
}
