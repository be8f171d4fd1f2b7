use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::context::RunContext;
use super::error::{BatchError, MoveError, WorkerFailure};
use super::kind::Kind;
use super::mover::Mover;
use super::planner::{PlanThresholds, WindowPlanner};
use super::window::TimeWindow;
use super::worker::{MigrationWorker, StopReason, WorkerReport};
use crate::config::EltConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
enum RunState {
    Idle,
    Running { run_id: String },
}

/// Per-kind totals for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KindTotals {
    /// Backlog over the whole coarse window, measured before any batch ran.
    pub estimated_missing: u64,
    pub moved: u64,
    /// Leaf windows this kind drained; capped or cancelled windows are not counted.
    pub windows_completed: usize,
    /// Set when a batch failure stopped this kind's stream.
    pub failure: Option<String>,
    pub cancelled: bool,
    /// At least one window stopped on the batch cap with rows left.
    pub capped: bool,
}

impl KindTotals {
    fn absorb(&mut self, report: &WorkerReport) {
        self.moved += report.moved;
        match report.stop {
            StopReason::Cancelled => self.cancelled = true,
            StopReason::BatchCap => self.capped = true,
            StopReason::Exhausted => self.windows_completed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub window: TimeWindow,
    pub leaf_windows: usize,
    pub orders: KindTotals,
    pub withdrawals: KindTotals,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn totals(&self, kind: Kind) -> &KindTotals {
        match kind {
            Kind::Order => &self.orders,
            Kind::Withdraw => &self.withdrawals,
        }
    }

    fn totals_mut(&mut self, kind: Kind) -> &mut KindTotals {
        match kind {
            Kind::Order => &mut self.orders,
            Kind::Withdraw => &mut self.withdrawals,
        }
    }

    fn active(&self, kind: Kind) -> bool {
        let t = self.totals(kind);
        t.failure.is_none() && !t.cancelled
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Another run was active in this process.
    Skipped { active_run_id: String },
}

/// Returns the coordinator to `Idle` when dropped, however the run ended.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = RunState::Idle;
    }
}

/// Runs both kinds over the planned leaf windows, one window at a time, with
/// the two kinds of each window in parallel. At most one run per instance.
pub struct RunCoordinator {
    mover: Arc<dyn Mover>,
    config: Arc<EltConfig>,
    state: Mutex<RunState>,
}

impl RunCoordinator {
    pub fn new(mover: Arc<dyn Mover>, config: Arc<EltConfig>) -> Self {
        Self {
            mover,
            config,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state != RunState::Idle
    }

    fn try_begin(&self, run_id: &str) -> Result<RunGuard<'_>, String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            RunState::Running { run_id: active } => Err(active.clone()),
            RunState::Idle => {
                *state = RunState::Running {
                    run_id: run_id.to_string(),
                };
                Ok(RunGuard { state: &self.state })
            }
        }
    }

    /// One pass over `coarse`. A trigger that arrives while another pass is
    /// running returns `Skipped` immediately.
    pub async fn run_once(&self, coarse: TimeWindow, cancel: CancellationToken) -> Result<RunOutcome> {
        let ctx = RunContext::new(cancel);
        let _guard = match self.try_begin(&ctx.run_id) {
            Ok(guard) => guard,
            Err(active_run_id) => {
                warn!(
                    run_id = %ctx.run_id, active_run_id = %active_run_id,
                    "previous run still running, skipping this trigger"
                );
                return Ok(RunOutcome::Skipped { active_run_id });
            }
        };
        self.execute(coarse, &ctx).await.map(RunOutcome::Completed)
    }

    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    async fn execute(&self, coarse: TimeWindow, ctx: &RunContext) -> Result<RunSummary> {
        let started = Instant::now();
        let cfg = &self.config;
        info!(
            run_id = %ctx.run_id, window = %coarse,
            batch_size = cfg.batch_size,
            max_batches = cfg.max_batches_per_run,
            pause_ms = cfg.pause_ms,
            workers = cfg.worker_threads,
            "run start"
        );

        let mut summary = RunSummary {
            run_id: ctx.run_id.clone(),
            window: coarse,
            leaf_windows: 0,
            orders: KindTotals::default(),
            withdrawals: KindTotals::default(),
            elapsed_ms: 0,
        };
        for kind in Kind::ALL {
            summary.totals_mut(kind).estimated_missing = self
                .mover
                .count_missing(kind, coarse)
                .await
                .with_context(|| format!("precheck count for {kind}"))?;
        }
        info!(
            run_id = %ctx.run_id,
            order_missing = summary.orders.estimated_missing,
            withdraw_missing = summary.withdrawals.estimated_missing,
            "precheck"
        );

        let planner = WindowPlanner::new(PlanThresholds::from_config(cfg));
        let leaves = planner.plan(&*self.mover, coarse, ctx).await?;
        summary.leaf_windows = leaves.len();

        // Run-scoped pool: permits bound concurrent workers, dropped with the run.
        let pool = Arc::new(Semaphore::new(cfg.worker_threads.max(1)));
        let worker = MigrationWorker::new(self.mover.clone(), cfg);

        for (idx, leaf) in leaves.iter().copied().enumerate() {
            if ctx.is_cancelled() {
                warn!(run_id = %ctx.run_id, remaining = leaves.len() - idx, "run cancelled, abandoning remaining windows");
                for kind in Kind::ALL {
                    if summary.active(kind) {
                        summary.totals_mut(kind).cancelled = true;
                    }
                }
                break;
            }
            let kinds: Vec<Kind> = Kind::ALL.into_iter().filter(|k| summary.active(*k)).collect();
            if kinds.is_empty() {
                break;
            }
            info!(
                run_id = %ctx.run_id, window = %leaf,
                index = idx + 1, of = leaves.len(),
                kinds = ?kinds,
                "window start"
            );

            let results = self.run_window(&worker, &pool, &kinds, leaf, ctx).await;
            for (kind, result) in results {
                let totals = summary.totals_mut(kind);
                match result {
                    Ok(report) => totals.absorb(&report),
                    Err(failure) if matches!(failure.cause, BatchError::Cancelled) => {
                        totals.moved += failure.moved;
                        totals.cancelled = true;
                    }
                    Err(failure) => {
                        totals.moved += failure.moved;
                        error!(
                            run_id = %ctx.run_id, %kind, window = %leaf,
                            moved_before_failure = failure.moved,
                            error = %failure,
                            "worker failed, stopping this kind for the rest of the run"
                        );
                        totals.failure = Some(failure.to_string());
                    }
                }
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            run_id = %ctx.run_id,
            order_moved = summary.orders.moved,
            order_missing = summary.orders.estimated_missing,
            order_failed = summary.orders.failure.is_some(),
            withdraw_moved = summary.withdrawals.moved,
            withdraw_missing = summary.withdrawals.estimated_missing,
            withdraw_failed = summary.withdrawals.failure.is_some(),
            elapsed_ms = summary.elapsed_ms,
            "run done"
        );
        Ok(summary)
    }

    /// Both kinds over one leaf window, concurrently; returns once both finish.
    ///
    /// On cancellation the workers get `shutdown_grace` to stop at their next
    /// suspension point, after which the remaining tasks are aborted.
    async fn run_window(
        &self,
        worker: &MigrationWorker,
        pool: &Arc<Semaphore>,
        kinds: &[Kind],
        window: TimeWindow,
        ctx: &RunContext,
    ) -> Vec<(Kind, Result<WorkerReport, WorkerFailure>)> {
        let handles: Vec<WorkerHandle> = kinds
            .iter()
            .map(|&kind| {
                let worker = worker.clone();
                let pool = pool.clone();
                let ctx = ctx.clone();
                let committed = Arc::new(AtomicU64::new(0));
                let progress = committed.clone();
                let handle = tokio::spawn(async move {
                    // The semaphore is never closed, so acquiring only waits.
                    let _permit = pool.acquire_owned().await.ok();
                    info!(run_id = %ctx.run_id, %kind, %window, "worker start");
                    let res = worker.run_tracked(kind, window, &ctx, &progress).await;
                    info!(run_id = %ctx.run_id, %kind, %window, ok = res.is_ok(), "worker done");
                    res
                });
                (kind, committed, handle)
            })
            .collect();

        let aborts: Vec<_> = handles.iter().map(|(_, _, h)| h.abort_handle()).collect();
        let joined = join_all(
            handles
                .into_iter()
                .map(|(kind, committed, h)| async move { (kind, committed, h.await) }),
        );
        tokio::pin!(joined);

        let grace = self.config.shutdown_grace();
        let cancel = ctx.cancel_token().clone();
        let finished = tokio::select! {
            res = &mut joined => Some(res),
            _ = shutdown_deadline(cancel, grace) => None,
        };
        let joined = match finished {
            Some(res) => res,
            None => {
                warn!(run_id = %ctx.run_id, grace_ms = grace.as_millis() as u64, "workers did not stop in time, aborting");
                for abort in &aborts {
                    abort.abort();
                }
                joined.await
            }
        };

        joined
            .into_iter()
            .map(|(kind, committed, res)| {
                let res = res.unwrap_or_else(|join_err| {
                    let cause = if join_err.is_cancelled() {
                        BatchError::Cancelled
                    } else {
                        BatchError::Fatal {
                            attempt: 0,
                            source: MoveError::msg(format!("worker task panicked: {join_err}")),
                        }
                    };
                    Err(WorkerFailure {
                        kind,
                        window,
                        // Batches already committed before the abort still count.
                        moved: committed.load(Ordering::SeqCst),
                        cause,
                    })
                });
                (kind, res)
            })
            .collect()
    }
}

type WorkerHandle = (
    Kind,
    Arc<AtomicU64>,
    JoinHandle<Result<WorkerReport, WorkerFailure>>,
);

/// Completes `grace` after `cancel` fires.
async fn shutdown_deadline(cancel: CancellationToken, grace: Duration) {
    cancel.cancelled().await;
    tokio::time::sleep(grace).await;
}
