use anyhow::{Context, Result};
use tracing::{info, warn};

use super::context::RunContext;
use super::kind::Kind;
use super::mover::BacklogEstimator;
use super::window::{Granularity, TimeWindow};
use crate::config::EltConfig;

#[derive(Debug, Clone, Copy)]
pub struct PlanThresholds {
    pub half_day: u64,
    pub hour: u64,
    pub max_batches_before_split: Option<u64>,
    pub batch_size: u64,
}

impl PlanThresholds {
    pub fn from_config(cfg: &EltConfig) -> Self {
        Self {
            half_day: cfg.half_day_switch_threshold,
            hour: cfg.hour_switch_threshold,
            max_batches_before_split: cfg.max_batches_before_split,
            batch_size: cfg.batch_size.max(1),
        }
    }

    fn exceeds(&self, backlog: u64, threshold: u64) -> bool {
        if backlog > threshold {
            return true;
        }
        match self.max_batches_before_split {
            Some(limit) => backlog.div_ceil(self.batch_size) > limit,
            None => false,
        }
    }
}

/// Decomposes a coarse window into leaf windows sized to the backlog:
/// day, then half-day, then hour. Hours are never split further.
pub struct WindowPlanner {
    thresholds: PlanThresholds,
}

impl WindowPlanner {
    pub fn new(thresholds: PlanThresholds) -> Self {
        Self { thresholds }
    }

    /// Leaf windows in chronological order; they tile `coarse` exactly.
    pub async fn plan<E>(
        &self,
        estimator: &E,
        coarse: TimeWindow,
        ctx: &RunContext,
    ) -> Result<Vec<TimeWindow>>
    where
        E: BacklogEstimator + ?Sized,
    {
        let mut leaves = Vec::new();
        for day in coarse.split(Granularity::Day) {
            if !self
                .over_threshold(estimator, day, Granularity::Day, self.thresholds.half_day, ctx)
                .await?
            {
                leaves.push(day);
                continue;
            }
            for half in day.split(Granularity::HalfDay) {
                if self
                    .over_threshold(estimator, half, Granularity::HalfDay, self.thresholds.hour, ctx)
                    .await?
                {
                    leaves.extend(half.split(Granularity::Hour));
                } else {
                    leaves.push(half);
                }
            }
        }
        info!(run_id = %ctx.run_id, window = %coarse, leaves = leaves.len(), "plan ready");
        Ok(leaves)
    }

    /// True when either kind's backlog in `window` calls for a finer split.
    async fn over_threshold<E>(
        &self,
        estimator: &E,
        window: TimeWindow,
        level: Granularity,
        threshold: u64,
        ctx: &RunContext,
    ) -> Result<bool>
    where
        E: BacklogEstimator + ?Sized,
    {
        let mut counts = [0u64; Kind::ALL.len()];
        for (slot, kind) in counts.iter_mut().zip(Kind::ALL) {
            *slot = estimator
                .estimate_backlog(kind, window)
                .await
                .with_context(|| format!("estimating {kind} backlog for {window}"))?;
        }
        let [order_missing, withdraw_missing] = counts;
        let split = counts.iter().any(|&n| self.thresholds.exceeds(n, threshold));
        if split {
            warn!(
                run_id = %ctx.run_id, level = level.as_str(), %window,
                order_missing, withdraw_missing, threshold,
                "large backlog, splitting window"
            );
        } else {
            info!(
                run_id = %ctx.run_id, level = level.as_str(), %window,
                order_missing, withdraw_missing,
                "window kept whole"
            );
        }
        Ok(split)
    }
}
