use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-invocation correlation id plus the run-level cancellation signal.
///
/// Passed explicitly to every planner, worker and retry call; cloning is cheap
/// and clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        let mut run_id = Uuid::new_v4().simple().to_string();
        run_id.truncate(8);
        Self { run_id, cancel }
    }

    pub fn with_id(run_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            run_id: run_id.into(),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleep for `dur`, returning `false` if the run was cancelled first.
    pub async fn pause(&self, dur: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(dur) => true,
        }
    }
}
