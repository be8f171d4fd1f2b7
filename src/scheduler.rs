//! Periodic trigger for the coordinator.
use std::sync::Arc;

use anyhow::Result;
use chrono::{FixedOffset, NaiveDateTime, Utc};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EltConfig;
use crate::elt::coordinator::{RunCoordinator, RunOutcome};
use crate::elt::window::TimeWindow;

/// Wall-clock time at the configured offset.
pub fn local_now(offset: FixedOffset) -> NaiveDateTime {
    Utc::now().with_timezone(&offset).naive_local()
}

/// `[first day of last month, now)` in the configured zone.
pub fn coarse_window(cfg: &EltConfig) -> Result<TimeWindow> {
    Ok(TimeWindow::previous_month_to(local_now(cfg.utc_offset))?)
}

pub fn log_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(s) => {
            let drained = s.orders.moved >= s.orders.estimated_missing
                && s.withdrawals.moved >= s.withdrawals.estimated_missing;
            info!(
                run_id = %s.run_id,
                order_moved = s.orders.moved,
                order_missing = s.orders.estimated_missing,
                withdraw_moved = s.withdrawals.moved,
                withdraw_missing = s.withdrawals.estimated_missing,
                drained,
                "run finished"
            );
        }
        RunOutcome::Skipped { active_run_id } => {
            warn!(active_run_id = %active_run_id, "trigger skipped, run already active")
        }
    }
}

/// Fire a run every `schedule_interval` until `shutdown`. Ticks are not
/// serialized here: a tick that lands on an active run is skipped by the
/// coordinator's reentrancy guard.
pub async fn run_scheduled(
    coordinator: Arc<RunCoordinator>,
    cfg: Arc<EltConfig>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut tick = interval(cfg.schedule_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut runs: JoinSet<()> = JoinSet::new();
    info!(
        interval_secs = cfg.schedule_interval_secs,
        offset = %cfg.utc_offset,
        "scheduler started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(joined) = runs.join_next(), if !runs.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "scheduled run task panicked");
                }
            }
            _ = tick.tick() => {
                let window = match coarse_window(&cfg) {
                    Ok(w) => w,
                    Err(e) => {
                        error!(error = %e, "could not compute run window");
                        continue;
                    }
                };
                let coord = coordinator.clone();
                let token = shutdown.clone();
                runs.spawn(async move {
                    match coord.run_once(window, token).await {
                        Ok(outcome) => log_outcome(&outcome),
                        Err(e) => error!(error = ?e, "run failed"),
                    }
                });
            }
        }
    }

    info!(in_flight = runs.len(), "scheduler stopping");
    let grace = cfg.shutdown_grace();
    let drained = tokio::time::timeout(grace, async {
        while runs.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(grace_secs = grace.as_secs(), "runs still active after grace period, aborting");
        runs.shutdown().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elt::testing::FakeMover;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[test]
    fn coarse_window_starts_on_first_of_previous_month() {
        use chrono::{Datelike, Timelike};
        let w = coarse_window(&EltConfig::default()).unwrap();
        assert_eq!(w.start().day(), 1);
        assert_eq!(w.start().hour(), 0);
        assert!(w.end() > w.start());
    }

    #[tokio::test(start_paused = true)]
    async fn fires_on_every_tick_until_shutdown() {
        use crate::elt::window::Granularity;

        let mover = Arc::new(FakeMover::new());
        let cfg = Arc::new(EltConfig {
            schedule_interval_secs: 60,
            half_day_switch_threshold: 10,
            hour_switch_threshold: 10,
            ..EltConfig::default()
        });
        // An empty store never splits: one precheck count per kind, then one
        // count per kind for every day of the coarse window.
        let days = coarse_window(&cfg).unwrap().split(Granularity::Day).len();
        let counts_per_run = 2 + 2 * days;

        let coord = Arc::new(RunCoordinator::new(mover.clone(), cfg.clone()));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_scheduled(coord.clone(), cfg, shutdown.clone()));

        // Ticks at 0s, 60s and 120s.
        tokio::time::sleep(Duration::from_secs(150)).await;
        let counts = mover.count_calls.load(Ordering::SeqCst);
        assert_eq!(counts, 3 * counts_per_run);
        // Each leaf window still gets one empty batch per kind.
        assert_eq!(mover.move_calls.load(Ordering::SeqCst), 3 * 2 * days);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert!(!coord.is_running());
    }
}
