use async_trait::async_trait;

use super::error::MoveError;
use super::kind::Kind;
use super::window::TimeWindow;

/// Storage primitives the migration engine drives.
///
/// `move_batch` must be atomic and idempotent over a window: re-invoking it
/// on an already drained window returns 0.
#[async_trait]
pub trait Mover: Send + Sync {
    /// Rows present at the source and absent at the destination in `window`.
    async fn count_missing(&self, kind: Kind, window: TimeWindow) -> Result<u64, MoveError>;

    /// Move up to `cap` missing rows in one transaction; returns rows moved.
    async fn move_batch(&self, kind: Kind, window: TimeWindow, cap: u64)
        -> Result<u64, MoveError>;
}

/// Read-only capability the planner needs to size windows.
#[async_trait]
pub trait BacklogEstimator: Send + Sync {
    async fn estimate_backlog(&self, kind: Kind, window: TimeWindow) -> Result<u64, MoveError>;
}

#[async_trait]
impl<M: Mover + ?Sized> BacklogEstimator for M {
    async fn estimate_backlog(&self, kind: Kind, window: TimeWindow) -> Result<u64, MoveError> {
        self.count_missing(kind, window).await
    }
}
