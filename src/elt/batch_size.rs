use std::time::Duration;

/// Hard floor for the adaptive batch size, independent of configuration.
pub const MIN_BATCH_SIZE: u64 = 2000;

/// What one capped unit of work did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub requested: u64,
    pub affected: u64,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl BatchOutcome {
    /// The batch hit its cap, so more backlog likely remains.
    pub fn is_full(&self) -> bool {
        self.affected >= self.requested
    }

    pub fn rows_per_sec(&self) -> f64 {
        let ms = self.elapsed.as_millis().max(1) as f64;
        self.affected as f64 * 1000.0 / ms
    }
}

/// Shrink-fast, grow-cautious sizing between a floor and the configured size.
#[derive(Debug, Clone, Copy)]
pub struct BatchSizeController {
    min: u64,
    max: u64,
    slow: Duration,
}

impl BatchSizeController {
    /// `configured` is the ceiling; the floor is `MIN_BATCH_SIZE`, lowered to
    /// `configured` when that is smaller so the bounds stay ordered.
    pub fn new(configured: u64, slow: Duration) -> Self {
        let max = configured.max(1);
        Self {
            min: MIN_BATCH_SIZE.min(max),
            max,
            slow,
        }
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow
    }

    pub fn is_slow(&self, outcome: &BatchOutcome) -> bool {
        outcome.elapsed >= self.slow
    }

    /// Effective size for the batch following `outcome`.
    pub fn next(&self, effective: u64, outcome: &BatchOutcome) -> u64 {
        let next = if self.is_slow(outcome) {
            effective / 2
        } else if outcome.elapsed < self.slow / 2 && outcome.is_full() {
            effective.saturating_mul(2)
        } else {
            effective
        };
        next.clamp(self.min, self.max)
    }
}
