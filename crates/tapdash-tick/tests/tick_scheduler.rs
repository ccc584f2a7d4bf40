//! Integration tests for the repeating tick scheduler.
//!
//! Every async test runs with a paused clock, so `sleep_until` resolves
//! as soon as the runtime has nothing else to do.

use std::time::Duration;

use tapdash_tick::{Deadline, TickConfig, TickPolicy, TickScheduler};
use tokio::time::Instant;

// =========================================================================
// Helpers
// =========================================================================

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn broadcast_cadence() -> TickScheduler {
    TickScheduler::with_period(ms(50))
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_policy_is_skip() {
    assert_eq!(TickConfig::with_period(ms(50)).policy, TickPolicy::Skip);
}

#[test]
fn test_validated_clamps_zero_period() {
    let cfg = TickConfig::with_period(Duration::ZERO).validated();
    assert_eq!(cfg.period, TickConfig::MIN_PERIOD);
}

// =========================================================================
// Start / stop
// =========================================================================

#[test]
fn test_scheduler_is_created_stopped() {
    let s = broadcast_cadence();
    assert!(!s.is_running());
    assert_eq!(s.tick_count(), 0);
    assert_eq!(s.period(), ms(50));
}

#[tokio::test(start_paused = true)]
async fn test_stopped_scheduler_never_fires() {
    let mut s = broadcast_cadence();
    let result =
        tokio::time::timeout(Duration::from_secs(5), s.wait_for_tick()).await;
    assert!(result.is_err(), "stopped scheduler should pend forever");
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_fires_one_period_after_start() {
    let mut s = TickScheduler::with_period(Duration::from_secs(1));
    let started = Instant::now();
    s.start();

    let info = s.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert!(!info.overrun);
    assert!(Instant::now() >= started + Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_ticks_increment_monotonically() {
    let mut s = broadcast_cadence();
    s.start();

    for expected in 1..=5 {
        let info = s.wait_for_tick().await;
        assert_eq!(info.tick, expected);
    }
    assert_eq!(s.tick_count(), 5);
    assert_eq!(s.metrics().total_ticks, 5);
}

#[tokio::test(start_paused = true)]
async fn test_stop_prevents_ticks_and_is_idempotent() {
    let mut s = broadcast_cadence();
    s.start();
    s.wait_for_tick().await;

    s.stop();
    s.stop();
    assert!(!s.is_running());

    let result =
        tokio::time::timeout(Duration::from_secs(1), s.wait_for_tick()).await;
    assert!(result.is_err(), "stopped scheduler should pend");
}

#[tokio::test(start_paused = true)]
async fn test_restart_resets_tick_count_but_keeps_metrics() {
    let mut s = broadcast_cadence();
    s.start();
    s.wait_for_tick().await;
    s.wait_for_tick().await;

    s.start();
    let info = s.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert_eq!(s.metrics().total_ticks, 3);
}

// =========================================================================
// Overruns
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_skip_policy_reports_skipped_ticks_when_late() {
    let mut s = broadcast_cadence();
    s.start();

    // Block the "actor" for several periods before polling the tick.
    tokio::time::advance(ms(230)).await;
    let info = s.wait_for_tick().await;

    assert!(info.overrun);
    assert_eq!(info.ticks_skipped, 3);
    assert_eq!(s.metrics().total_overruns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_keeps_original_cadence() {
    let mut s = TickScheduler::new(TickConfig {
        period: ms(50),
        policy: TickPolicy::Drop,
    });
    s.start();

    tokio::time::advance(ms(120)).await;
    let first = s.wait_for_tick().await;
    assert!(first.overrun);
    assert_eq!(first.ticks_skipped, 0);

    // The next deadline (100 ms) is already in the past, so it fires
    // immediately.
    let second =
        tokio::time::timeout(ms(1), s.wait_for_tick()).await.expect("due");
    assert_eq!(second.tick, 2);
}

// =========================================================================
// Integration: select! loop pattern (mirrors the room actor)
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_countdown_then_timeout_in_select_loop() {
    let mut countdown = TickScheduler::with_period(Duration::from_secs(1));
    let mut timeout: Deadline<u64> = Deadline::pending();
    countdown.start();

    let mut counts = Vec::new();
    let mut remaining = 3u32;
    let fired_epoch = loop {
        tokio::select! {
            _ = countdown.wait_for_tick() => {
                counts.push(remaining);
                if remaining == 0 {
                    countdown.stop();
                    timeout.arm(Instant::now() + Duration::from_secs(120), 1);
                } else {
                    remaining -= 1;
                }
            }
            epoch = timeout.wait() => break epoch,
        }
    };

    assert_eq!(counts, vec![3, 2, 1, 0]);
    assert_eq!(fired_epoch, 1);
    assert!(!countdown.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_command_preempts_ticks_in_select_loop() {
    let mut s = broadcast_cadence();
    s.start();

    let (tx, mut rx) = tokio::sync::mpsc::channel::<&str>(10);
    tokio::spawn(async move {
        tokio::time::sleep(ms(160)).await;
        tx.send("stop").await.ok();
    });

    let mut ticks_fired = 0u64;
    loop {
        tokio::select! {
            Some(cmd) = rx.recv() => {
                assert_eq!(cmd, "stop");
                break;
            }
            info = s.wait_for_tick() => {
                ticks_fired += 1;
                assert_eq!(info.tick, ticks_fired);
            }
        }
    }

    assert!(ticks_fired >= 3, "expected at least 3 ticks, got {ticks_fired}");
}
