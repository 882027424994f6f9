//! Background processing: the walk scheduler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use walkstat_core::fmt::format_duration;
use walkstat_core::walker::WalkStatus;

use crate::state::{AppState, release_memory_to_os};

/// Triggers a walk every `interval`, starting immediately.
///
/// Walks are not awaited by the loop: a tick that fires while the previous
/// walk still runs is dropped by the backend's in-progress guard.
pub(crate) async fn schedule_loop(state: AppState, interval: Duration) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tick.tick().await;
        tokio::spawn(run_walk(state.clone(), interval));
    }
}

/// Runs one walk off the async runtime and records its outcome.
pub(crate) async fn run_walk(state: AppState, interval: Duration) {
    let backend = Arc::clone(&state.backend);
    let t0 = Instant::now();
    let result = tokio::task::spawn_blocking(move || backend.walk()).await;
    let elapsed = t0.elapsed();

    match result {
        Ok(Ok(WalkStatus::Completed(report))) => {
            debug!(
                duration_ms = elapsed.as_millis() as u64,
                prefixes = report.prefix_count,
                "walk report stored"
            );
            state.set_last_report(report);
            release_memory_to_os();
            if elapsed > interval {
                warn!(
                    duration = %format_duration(elapsed),
                    interval = %format_duration(interval),
                    "walk took longer than the scrape interval"
                );
            }
        }
        Ok(Ok(WalkStatus::Skipped)) => {
            warn!("previous walk still running, tick skipped");
        }
        Ok(Err(e)) => {
            error!(
                error = %e,
                duration_ms = elapsed.as_millis() as u64,
                "walk failed, keeping previous metrics"
            );
        }
        Err(e) => {
            error!(error = %e, "walk panicked in spawn_blocking");
        }
    }
}
