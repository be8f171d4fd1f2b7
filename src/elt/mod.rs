//! Adaptive, windowed migration of missing log rows.
//!
//! The coordinator plans leaf windows over a coarse range, then drives one
//! worker per kind through each window. Workers issue capped batches through
//! the retry policy and resize them from observed latency.

pub mod batch_size;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod kind;
pub mod mover;
pub mod mysql_mover;
pub mod pg_mover;
pub mod planner;
pub mod retry;
pub mod tables;
pub mod window;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use context::RunContext;
pub use coordinator::{KindTotals, RunCoordinator, RunOutcome, RunSummary};
pub use kind::Kind;
pub use mover::Mover;
pub use window::TimeWindow;
