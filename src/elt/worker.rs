use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::batch_size::{BatchOutcome, BatchSizeController};
use super::context::RunContext;
use super::error::{BatchError, WorkerFailure};
use super::kind::Kind;
use super::mover::Mover;
use super::retry::RetryPolicy;
use super::window::TimeWindow;
use crate::config::EltConfig;

/// Why a worker stopped without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A batch moved nothing: the window is drained.
    Exhausted,
    /// `max_batches_per_run` reached; a later run picks up the rest.
    BatchCap,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub kind: Kind,
    pub window: TimeWindow,
    pub moved: u64,
    pub batches: u32,
    pub stop: StopReason,
    pub final_batch_size: u64,
}

/// Drives one kind through one window in strictly sequential capped batches.
#[derive(Clone)]
pub struct MigrationWorker {
    mover: Arc<dyn Mover>,
    retry: RetryPolicy,
    sizing: BatchSizeController,
    initial_batch_size: u64,
    max_batches: u32,
    pause: Duration,
}

impl MigrationWorker {
    pub fn new(mover: Arc<dyn Mover>, cfg: &EltConfig) -> Self {
        Self {
            mover,
            retry: RetryPolicy::new(cfg.max_retry, cfg.retry_backoff_base()),
            sizing: BatchSizeController::new(cfg.batch_size, cfg.slow_batch()),
            initial_batch_size: cfg.batch_size,
            max_batches: cfg.max_batches_per_run,
            pause: cfg.pause(),
        }
    }

    pub async fn run(
        &self,
        kind: Kind,
        window: TimeWindow,
        ctx: &RunContext,
    ) -> Result<WorkerReport, WorkerFailure> {
        self.run_tracked(kind, window, ctx, &AtomicU64::new(0)).await
    }

    /// Like [`run`](Self::run), but adds every committed batch to `committed`
    /// as soon as it lands, so the caller still knows the total if this
    /// future is dropped or its task aborted mid-window.
    pub async fn run_tracked(
        &self,
        kind: Kind,
        window: TimeWindow,
        ctx: &RunContext,
        committed: &AtomicU64,
    ) -> Result<WorkerReport, WorkerFailure> {
        // Effective batch size lives only for this window.
        let mut effective = self.initial_batch_size.clamp(self.sizing.min(), self.sizing.max());
        let mut moved = 0u64;
        let mut batches = 0u32;

        let stop = loop {
            if ctx.is_cancelled() {
                break StopReason::Cancelled;
            }
            if batches >= self.max_batches {
                break StopReason::BatchCap;
            }
            let batch_no = batches + 1;
            let cap = effective;

            let attempt = self
                .retry
                .execute(ctx, kind, || self.mover.move_batch(kind, window, cap))
                .await;
            let done = match attempt {
                Ok(done) => done,
                Err(BatchError::Cancelled) => break StopReason::Cancelled,
                Err(cause) => {
                    return Err(WorkerFailure {
                        kind,
                        window,
                        moved,
                        cause,
                    })
                }
            };

            if done.value == 0 {
                info!(
                    run_id = %ctx.run_id, %kind, %window,
                    total_moved = moved, batch = batch_no, batch_size = effective,
                    "no more rows"
                );
                break StopReason::Exhausted;
            }

            let outcome = BatchOutcome {
                requested: cap,
                affected: done.value,
                elapsed: done.elapsed,
                attempts: done.attempts,
            };
            moved += outcome.affected;
            committed.fetch_add(outcome.affected, Ordering::SeqCst);
            batches = batch_no;

            let next = self.sizing.next(effective, &outcome);
            info!(
                run_id = %ctx.run_id, %kind, %window,
                batch = batch_no,
                affected = outcome.affected,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                rows_per_sec = outcome.rows_per_sec().round() as u64,
                attempts = outcome.attempts,
                total_moved = moved,
                batch_size = cap,
                next_batch_size = next,
                "batch end"
            );
            if self.sizing.is_slow(&outcome) {
                warn!(
                    run_id = %ctx.run_id, %kind,
                    batch = batch_no,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    slow_ms = self.sizing.slow_threshold().as_millis() as u64,
                    affected = outcome.affected,
                    batch_size = cap,
                    "slow batch"
                );
            }
            if next != effective {
                let direction = if next < effective { "shrink" } else { "grow" };
                info!(
                    run_id = %ctx.run_id, %kind,
                    batch = batch_no, from = effective, to = next, direction,
                    "batch size adjusted"
                );
                effective = next;
            }

            if !self.pause.is_zero() && batches < self.max_batches && !ctx.pause(self.pause).await {
                break StopReason::Cancelled;
            }
        };

        match stop {
            StopReason::BatchCap => warn!(
                run_id = %ctx.run_id, %kind, %window, total_moved = moved, batches,
                "batch cap reached, remaining rows left for the next run"
            ),
            StopReason::Cancelled => warn!(
                run_id = %ctx.run_id, %kind, %window, total_moved = moved, batches,
                "cancelled between batches"
            ),
            StopReason::Exhausted => {}
        }
        info!(
            run_id = %ctx.run_id, %kind, %window, total_moved = moved, batches,
            final_batch_size = effective,
            "window summary"
        );

        Ok(WorkerReport {
            kind,
            window,
            moved,
            batches,
            stop,
            final_batch_size: effective,
        })
    }
}
