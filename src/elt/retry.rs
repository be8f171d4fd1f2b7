use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use super::context::RunContext;
use super::error::{classify, BatchError, FailureClass, MoveError};
use super::kind::Kind;

/// Result of a unit of work that eventually succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    /// Total attempts, including the successful one.
    pub attempts: u32,
    /// Duration of the successful attempt only; backoff time is excluded.
    pub elapsed: Duration,
}

impl<T> Retried<T> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Retries lock-contention failures with linear backoff. Callers must not add
/// their own retry layer on top.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retry: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retry: u32, backoff_base: Duration) -> Self {
        Self {
            max_retry,
            backoff_base,
        }
    }

    /// `base * attempt`, where `attempt` is the 1-based attempt that just failed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }

    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &RunContext,
        kind: Kind,
        mut unit: F,
    ) -> Result<Retried<T>, BatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MoveError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            let err = match unit().await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    })
                }
                Err(err) => err,
            };

            match classify(&err) {
                FailureClass::Fatal => {
                    return Err(BatchError::Fatal {
                        attempt,
                        source: err,
                    })
                }
                FailureClass::TransientLock if attempt > self.max_retry => {
                    return Err(BatchError::RetriesExhausted {
                        retries: self.max_retry,
                        source: err,
                    })
                }
                FailureClass::TransientLock => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        run_id = %ctx.run_id,
                        %kind,
                        attempt,
                        max_retry = self.max_retry,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "lock contention, retrying batch"
                    );
                    if !ctx.pause(backoff).await {
                        return Err(BatchError::Cancelled);
                    }
                }
            }
        }
    }
}
