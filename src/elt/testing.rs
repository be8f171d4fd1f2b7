//! In-memory `Mover` used by the engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::error::MoveError;
use super::kind::Kind;
use super::mover::Mover;
use super::window::TimeWindow;

pub(crate) fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

pub(crate) fn window(a: &str, b: &str) -> TimeWindow {
    TimeWindow::new(at(a), at(b)).unwrap()
}

/// Scripted reply for one `move_batch` call.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Moved(u64),
    Fail(String),
}

#[derive(Default)]
struct State {
    /// Missing-row timestamps per kind.
    rows: HashMap<Kind, Vec<NaiveDateTime>>,
    /// Replies consumed before falling back to `rows`.
    script: HashMap<Kind, VecDeque<Reply>>,
    /// Caps requested per kind, in call order.
    caps: HashMap<Kind, Vec<u64>>,
    count_failures: HashMap<Kind, String>,
}

#[derive(Default)]
pub(crate) struct FakeMover {
    state: Mutex<State>,
    pub move_calls: AtomicUsize,
    pub count_calls: AtomicUsize,
    /// Simulated per-batch latency (use with paused tokio time).
    pub latency: Mutex<Option<Duration>>,
}

impl FakeMover {
    pub fn new() -> Self {
        Self::default()
    }

    /// `n` missing rows spread evenly, one every `step`, starting at `from`.
    pub fn with_rows(self, kind: Kind, from: NaiveDateTime, step: chrono::Duration, n: usize) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            let rows = st.rows.entry(kind).or_default();
            rows.extend((0..n).map(|i| from + step * i as i32));
            rows.sort();
        }
        self
    }

    pub fn with_script(self, kind: Kind, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.state
            .lock()
            .unwrap()
            .script
            .entry(kind)
            .or_default()
            .extend(replies);
        self
    }

    pub fn failing_count(self, kind: Kind, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .count_failures
            .insert(kind, message.to_string());
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn caps(&self, kind: Kind) -> Vec<u64> {
        self.state.lock().unwrap().caps.get(&kind).cloned().unwrap_or_default()
    }

    pub fn remaining(&self, kind: Kind) -> usize {
        self.state.lock().unwrap().rows.get(&kind).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Mover for FakeMover {
    async fn count_missing(&self, kind: Kind, window: TimeWindow) -> Result<u64, MoveError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        let st = self.state.lock().unwrap();
        if let Some(msg) = st.count_failures.get(&kind) {
            return Err(MoveError::msg(msg.clone()));
        }
        let n = st.rows.get(&kind).map_or(0, |rows| {
            rows.iter()
                .filter(|t| **t >= window.start() && **t < window.end())
                .count()
        });
        Ok(n as u64)
    }

    async fn move_batch(&self, kind: Kind, window: TimeWindow, cap: u64) -> Result<u64, MoveError> {
        self.move_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut st = self.state.lock().unwrap();
        st.caps.entry(kind).or_default().push(cap);
        if let Some(reply) = st.script.get_mut(&kind).and_then(VecDeque::pop_front) {
            return match reply {
                Reply::Moved(n) => Ok(n),
                Reply::Fail(msg) => Err(MoveError::msg(msg)),
            };
        }
        let Some(rows) = st.rows.get_mut(&kind) else {
            return Ok(0);
        };
        let mut moved = 0u64;
        rows.retain(|t| {
            let inside = *t >= window.start() && *t < window.end();
            if inside && moved < cap {
                moved += 1;
                false
            } else {
                true
            }
        });
        Ok(moved)
    }
}
