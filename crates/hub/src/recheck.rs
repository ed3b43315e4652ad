//! Periodic liveness re-check: recomputes the device online flag every
//! [`RECHECK_INTERVAL`] so the device goes offline even when nothing arrives.
//!
//! Runs under the same write lock as ingest; stops when the shutdown signal
//! flips to `true` or its sender is dropped.

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::liveness::{DeviceStatus, Transition, LIVENESS_WINDOW_MS, RECHECK_INTERVAL};
use crate::reading::now_millis;
use crate::state::SharedState;

/// Run the re-check loop. Intended to be `tokio::spawn`-ed from main.
pub async fn run(shared: SharedState, shutdown: watch::Receiver<bool>) {
    run_with_clock(shared, shutdown, now_millis).await
}

/// Same loop, reading "now" in epoch ms from `clock` on every tick.
pub async fn run_with_clock<F>(shared: SharedState, mut shutdown: watch::Receiver<bool>, clock: F)
where
    F: Fn() -> i64,
{
    let mut ticker = tokio::time::interval(RECHECK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval_ms = RECHECK_INTERVAL.as_millis() as u64,
        window_ms = LIVENESS_WINDOW_MS,
        "liveness re-check started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick(&shared, clock()).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("liveness re-check stopped");
}

/// One re-check at `now`. Returns the transition, if any, after logging it.
pub async fn tick(shared: &SharedState, now: i64) -> Option<Transition> {
    let mut st = shared.write().await;
    let transition = st.evaluate(now)?;
    let status = st.device_status();
    drop(st);

    log_transition(transition, &status);
    Some(transition)
}

pub fn log_transition(transition: Transition, status: &DeviceStatus) {
    let device = status.device_id.as_deref().unwrap_or("unknown");
    match transition {
        Transition::CameOnline => info!(device, "device is now online"),
        Transition::WentOffline => warn!(
            device,
            last_seen = status.last_seen,
            "device is now offline"
        ),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
