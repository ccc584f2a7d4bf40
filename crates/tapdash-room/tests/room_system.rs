//! Integration tests for room actors and the registry.
//!
//! Every test runs with a paused clock: countdowns, race timeouts and
//! podium delays elapse as soon as the runtime goes idle.

use std::time::Duration;

use tapdash_protocol::{
    PlayerId, RoomEvent, RoomState, SessionId, SettingsPatch,
};
use tapdash_room::{PlayerSender, RoomConfig, RoomError, RoomHandle, RoomRegistry};
use tokio::sync::mpsc;
use tokio::time::Instant;

// =========================================================================
// Helpers
// =========================================================================

const HOST: PlayerId = PlayerId(1000);

type Events = mpsc::UnboundedReceiver<RoomEvent>;

fn pid(id: u64) -> PlayerId {
    PlayerId(id)
}

fn sid(id: u64) -> SessionId {
    SessionId::new(format!("session-{id}")).unwrap()
}

fn channel() -> (PlayerSender, Events) {
    mpsc::unbounded_channel()
}

fn create(registry: &mut RoomRegistry) -> (RoomHandle, Events) {
    let (tx, rx) = channel();
    (registry.create_room(HOST, tx), rx)
}

async fn join(room: &RoomHandle, id: u64) -> Events {
    let (tx, rx) = channel();
    room.join(pid(id), sid(id), Some(format!("P{id}")), None, tx)
        .await
        .expect("join");
    rx
}

async fn short_race(room: &RoomHandle) {
    room.update_settings(
        HOST,
        SettingsPatch {
            race_length: Some("short".into()),
            medal_count: None,
        },
    )
    .await
    .unwrap();
}

/// Waits for the first event matching `pred`, skipping everything else.
async fn expect_event(
    rx: &mut Events,
    pred: impl Fn(&RoomEvent) -> bool,
) -> RoomEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .expect("timed out waiting for event")
}

async fn tap_n(room: &RoomHandle, id: u64, n: u32) {
    for _ in 0..n {
        room.tap(pid(id)).await.unwrap();
    }
}

async fn wait_for_race_start(host: &mut Events) {
    expect_event(host, |e| matches!(e, RoomEvent::RaceStarted { .. })).await;
}

// =========================================================================
// Registry
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_create_room_starts_in_lobby() {
    let mut registry = RoomRegistry::default();
    let (room, _host) = create(&mut registry);

    let info = room.info().await.unwrap();

    assert_eq!(info.state, RoomState::Lobby);
    assert_eq!(info.player_count, 0);
    assert_eq!(info.max_players, 50);
    assert!(info.taken_slots.is_empty());
    assert!(registry.lookup(room.room_code()).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_lookup_is_case_insensitive_through_parse() {
    let mut registry = RoomRegistry::default();
    let (room, _host) = create(&mut registry);
    let lower = room.room_code().as_str().to_lowercase();

    let code = tapdash_protocol::RoomCode::parse(&lower).unwrap();

    assert!(registry.lookup(&code).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_deleted_room_handle_is_unavailable() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let code = room.room_code().clone();

    registry.delete_room(&code).await.unwrap();

    expect_event(&mut host, |e| matches!(e, RoomEvent::RoomClosed)).await;
    assert!(matches!(room.info().await, Err(RoomError::Unavailable(_))));
    assert!(matches!(registry.lookup(&code), Err(RoomError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_deletes_abandoned_room_only() {
    let config = RoomConfig {
        empty_retention: Duration::from_secs(60),
        ..RoomConfig::default()
    };
    let registry = tokio::sync::Mutex::new(RoomRegistry::new(config));
    let (abandoned, mut abandoned_host) = create(&mut *registry.lock().await);
    let (occupied, _occupied_host) = create(&mut *registry.lock().await);
    let _p1 = join(&occupied, 1).await;

    let swept = RoomRegistry::sweep(&registry, Instant::now()).await;
    assert!(swept.is_empty());

    let later = Instant::now() + Duration::from_secs(61);
    let swept = RoomRegistry::sweep(&registry, later).await;

    assert_eq!(swept, vec![abandoned.room_code().clone()]);
    assert_eq!(registry.lock().await.room_count(), 1);
    expect_event(&mut abandoned_host, |e| matches!(e, RoomEvent::RoomClosed)).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_all_closes_every_room() {
    let mut registry = RoomRegistry::default();
    let (_a, mut host_a) = create(&mut registry);
    let (_b, mut host_b) = create(&mut registry);

    registry.shutdown_all().await;

    assert_eq!(registry.room_count(), 0);
    expect_event(&mut host_a, |e| matches!(e, RoomEvent::RoomClosed)).await;
    expect_event(&mut host_b, |e| matches!(e, RoomEvent::RoomClosed)).await;
}

// =========================================================================
// Membership
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_join_broadcasts_to_host_and_players() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let mut p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;

    let event = expect_event(&mut host, |e| {
        matches!(e, RoomEvent::PlayerJoined { total_players: 2, .. })
    })
    .await;
    let RoomEvent::PlayerJoined { player, .. } = event else {
        unreachable!()
    };
    assert_eq!(player.number, 2);

    expect_event(&mut p1, |e| {
        matches!(e, RoomEvent::PlayerJoined { total_players: 2, .. })
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_then_reconnect_restores_player() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let (tx, _rx) = channel();
    let joined = room
        .join(pid(1), sid(1), Some("Ana".into()), None, tx)
        .await
        .unwrap();

    room.disconnect(pid(1)).await.unwrap();
    expect_event(&mut host, |e| matches!(e, RoomEvent::PlayerLeft { .. })).await;

    let info = room.info().await.unwrap();
    assert_eq!(info.player_count, 0);
    assert_eq!(info.taken_slots, vec![joined.player.slot()]);

    let (tx, _rx) = channel();
    let back = room.reconnect(pid(7), sid(1), tx).await.unwrap();
    assert_eq!(back.player.id, pid(7));
    assert_eq!(back.player.name, "Ana");
    assert_eq!(back.player.number, joined.player.number);
    expect_event(&mut host, |e| matches!(e, RoomEvent::PlayerReconnected { .. })).await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_grace_window_fails() {
    let mut registry = RoomRegistry::default();
    let (room, _host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    room.disconnect(pid(1)).await.unwrap();
    // The disconnect is queued; a request behind it waits until it is parked.
    assert_eq!(room.info().await.unwrap().player_count, 0);

    tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;

    let (tx, _rx) = channel();
    let result = room.reconnect(pid(7), sid(1), tx).await;
    assert!(matches!(result, Err(RoomError::Session(_))));
}

#[tokio::test(start_paused = true)]
async fn test_detached_disconnect_survives_full_queue() {
    let config = RoomConfig {
        channel_size: 4,
        ..RoomConfig::default()
    };
    let mut registry = RoomRegistry::new(config);
    let (room, mut host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    let p2 = {
        let (tx, rx) = channel();
        let admission = room.join(pid(2), sid(2), None, None, tx).await.unwrap();
        drop(rx);
        admission.player
    };

    // Lobby taps are ignored, but they occupy the queue until the actor
    // next runs.
    tap_n(&room, 1, 4).await;
    room.disconnect_detached(pid(2));

    let event = expect_event(&mut host, |e| {
        matches!(e, RoomEvent::PlayerLeft { player_id, .. } if *player_id == pid(2))
    })
    .await;
    assert!(matches!(event, RoomEvent::PlayerLeft { total_players: 1, .. }));

    let info = room.info().await.unwrap();
    assert_eq!(info.player_count, 1);
    assert!(info.taken_slots.contains(&p2.slot()));

    let (tx, _rx) = channel();
    let back = room.reconnect(pid(9), sid(2), tx).await.unwrap();
    assert_eq!(back.player.number, p2.number);
}

#[tokio::test(start_paused = true)]
async fn test_host_disconnect_promotes_first_player() {
    let mut registry = RoomRegistry::default();
    let (room, _host) = create(&mut registry);
    let mut p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;

    room.disconnect(HOST).await.unwrap();

    let event =
        expect_event(&mut p1, |e| matches!(e, RoomEvent::HostChanged { .. })).await;
    assert!(matches!(
        event,
        RoomEvent::HostChanged { new_host_id: Some(id) } if id == pid(1)
    ));
    assert_eq!(room.snapshot().await.unwrap().host_id, Some(pid(1)));
}

#[tokio::test(start_paused = true)]
async fn test_join_during_race_is_rejected() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;
    room.start_race(HOST).await.unwrap();
    expect_event(&mut host, |e| matches!(e, RoomEvent::CountdownStarted)).await;

    let (tx, _rx) = channel();
    let result = room.join(pid(3), sid(3), None, None, tx).await;

    assert!(matches!(result, Err(RoomError::GameInProgress(_))));
}

// =========================================================================
// Race loop
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_countdown_runs_three_to_zero_then_race_starts() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;
    let started = Instant::now();

    room.start_race(HOST).await.unwrap();

    let mut counts = Vec::new();
    loop {
        match expect_event(&mut host, |e| {
            matches!(e, RoomEvent::Countdown { .. } | RoomEvent::RaceStarted { .. })
        })
        .await
        {
            RoomEvent::Countdown { count } => counts.push(count),
            RoomEvent::RaceStarted { taps_required } => {
                assert_eq!(taps_required, 300);
                break;
            }
            _ => unreachable!(),
        }
    }
    assert_eq!(counts, vec![3, 2, 1, 0]);
    assert!(Instant::now() >= started + Duration::from_secs(4));
    assert_eq!(room.info().await.unwrap().state, RoomState::Racing);
}

#[tokio::test(start_paused = true)]
async fn test_start_from_non_host_is_ignored() {
    let mut registry = RoomRegistry::default();
    let (room, _host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;

    room.start_race(pid(1)).await.unwrap();
    room.info().await.unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(room.info().await.unwrap().state, RoomState::Lobby);
}

#[tokio::test(start_paused = true)]
async fn test_positions_broadcast_while_racing() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;
    room.start_race(HOST).await.unwrap();
    wait_for_race_start(&mut host).await;

    tap_n(&room, 2, 15).await;

    let event = expect_event(&mut host, |e| match e {
        RoomEvent::PositionUpdate { positions } => positions[0].taps == 15,
        _ => false,
    })
    .await;
    let RoomEvent::PositionUpdate { positions } = event else {
        unreachable!()
    };
    assert_eq!(positions[0].id, pid(2));
    assert_eq!(positions[0].position, 5.0);
    assert_eq!(positions[1].id, pid(1));
}

#[tokio::test(start_paused = true)]
async fn test_full_race_ends_naturally_then_podium_then_results() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let mut p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;
    short_race(&room).await;
    room.start_race(HOST).await.unwrap();
    wait_for_race_start(&mut host).await;

    tap_n(&room, 1, 180).await;
    tap_n(&room, 2, 180).await;

    let finished =
        expect_event(&mut p1, |e| matches!(e, RoomEvent::PlayerFinished { .. })).await;
    assert!(matches!(
        finished,
        RoomEvent::PlayerFinished { position: 1, taps: 180, total_players: 2, .. }
    ));

    let ended = expect_event(&mut host, |e| matches!(e, RoomEvent::RaceEnded { .. })).await;
    let RoomEvent::RaceEnded { results } = ended else {
        unreachable!()
    };
    assert_eq!(results.finish_order.len(), 2);
    assert!(results.dnf.is_empty());
    assert_eq!(results.finish_order[0].player.id, pid(1));

    let at_finish = Instant::now();
    expect_event(&mut host, |e| {
        matches!(e, RoomEvent::StateChanged { state: RoomState::Podium })
    })
    .await;
    assert!(Instant::now() >= at_finish + Duration::from_secs(1));
    expect_event(&mut host, |e| {
        matches!(e, RoomEvent::StateChanged { state: RoomState::Results })
    })
    .await;
    assert!(Instant::now() >= at_finish + Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_race_times_out_with_dnf() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;
    short_race(&room).await;
    room.start_race(HOST).await.unwrap();
    wait_for_race_start(&mut host).await;
    let started = Instant::now();

    tap_n(&room, 1, 180).await;
    tap_n(&room, 2, 90).await;

    let ended = expect_event(&mut host, |e| matches!(e, RoomEvent::RaceEnded { .. })).await;
    let elapsed = Instant::now() - started;
    assert!(elapsed >= Duration::from_secs(120));
    assert!(elapsed < Duration::from_secs(121));

    let RoomEvent::RaceEnded { results } = ended else {
        unreachable!()
    };
    assert_eq!(results.finish_order.len(), 1);
    assert_eq!(results.dnf.len(), 1);
    assert_eq!(results.dnf[0].id, pid(2));
    assert_eq!(results.race_stats.race_length, "60m Sprint");
}

#[tokio::test(start_paused = true)]
async fn test_force_finish_ends_race_once() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;
    room.start_race(HOST).await.unwrap();
    wait_for_race_start(&mut host).await;

    room.force_finish(HOST).await.unwrap();
    room.force_finish(HOST).await.unwrap();

    let ended = expect_event(&mut host, |e| matches!(e, RoomEvent::RaceEnded { .. })).await;
    let RoomEvent::RaceEnded { results } = ended else {
        unreachable!()
    };
    assert_eq!(results.dnf.len(), 2);

    // No second RaceEnded before the podium.
    let next = expect_event(&mut host, |e| {
        matches!(e, RoomEvent::RaceEnded { .. } | RoomEvent::StateChanged { .. })
    })
    .await;
    assert!(matches!(next, RoomEvent::StateChanged { state: RoomState::Podium }));
}

#[tokio::test(start_paused = true)]
async fn test_rematch_cancels_pending_phase_timers() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;
    room.start_race(HOST).await.unwrap();
    wait_for_race_start(&mut host).await;
    room.force_finish(HOST).await.unwrap();
    expect_event(&mut host, |e| matches!(e, RoomEvent::RaceEnded { .. })).await;

    // Rematch from FINISH, before the podium delay elapses.
    room.rematch(HOST).await.unwrap();
    let event =
        expect_event(&mut host, |e| matches!(e, RoomEvent::RematchStarted { .. })).await;
    let RoomEvent::RematchStarted { room: snapshot } = event else {
        unreachable!()
    };
    assert_eq!(snapshot.state, RoomState::Lobby);
    assert!(snapshot.players.iter().all(|p| p.taps == 0 && !p.finished && !p.dnf));

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(room.info().await.unwrap().state, RoomState::Lobby);
}

#[tokio::test(start_paused = true)]
async fn test_rematch_then_second_race_runs() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;
    short_race(&room).await;
    room.start_race(HOST).await.unwrap();
    wait_for_race_start(&mut host).await;
    room.force_finish(HOST).await.unwrap();
    expect_event(&mut host, |e| {
        matches!(e, RoomEvent::StateChanged { state: RoomState::Results })
    })
    .await;

    room.rematch(HOST).await.unwrap();
    room.start_race(HOST).await.unwrap();
    wait_for_race_start(&mut host).await;
    tap_n(&room, 1, 180).await;
    tap_n(&room, 2, 180).await;

    let ended = expect_event(&mut host, |e| matches!(e, RoomEvent::RaceEnded { .. })).await;
    let RoomEvent::RaceEnded { results } = ended else {
        unreachable!()
    };
    assert_eq!(results.finish_order.len(), 2);
    assert!(results.dnf.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_leaving_last_runner_ends_race() {
    let mut registry = RoomRegistry::default();
    let (room, mut host) = create(&mut registry);
    let _p1 = join(&room, 1).await;
    let _p2 = join(&room, 2).await;
    short_race(&room).await;
    room.start_race(HOST).await.unwrap();
    wait_for_race_start(&mut host).await;

    tap_n(&room, 1, 180).await;
    room.leave(pid(2)).await.unwrap();

    let ended = expect_event(&mut host, |e| matches!(e, RoomEvent::RaceEnded { .. })).await;
    let RoomEvent::RaceEnded { results } = ended else {
        unreachable!()
    };
    assert_eq!(results.race_stats.total_players, 1);
    assert_eq!(results.finish_order.len(), 1);
}
