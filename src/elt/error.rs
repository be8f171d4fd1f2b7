use thiserror::Error;

use super::kind::Kind;
use super::window::TimeWindow;

/// Failure reported by a `Mover` primitive.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Message(String),
}

impl MoveError {
    pub fn msg(message: impl Into<String>) -> Self {
        MoveError::Message(message.into())
    }
}

/// How a failed unit of work should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    TransientLock,
    Fatal,
}

/// SQLSTATE / vendor codes for lock contention: Postgres deadlock, lock not
/// available, serialization failure; MySQL deadlock and lock wait timeout.
const TRANSIENT_CODES: &[&str] = &["40P01", "55P03", "40001", "1213", "1205"];

const TRANSIENT_SIGNATURES: &[&str] = &[
    "deadlock",
    "lock wait timeout",
    "lock timeout",
    "could not obtain lock",
    "canceling statement due to lock timeout",
    "could not serialize access",
];

pub fn classify(err: &MoveError) -> FailureClass {
    let message = match err {
        MoveError::Database(sqlx::Error::Database(db)) => {
            if let Some(code) = db.code() {
                if TRANSIENT_CODES.contains(&&*code) {
                    return FailureClass::TransientLock;
                }
            }
            db.message().to_ascii_lowercase()
        }
        MoveError::Database(other) => other.to_string().to_ascii_lowercase(),
        MoveError::Message(m) => m.to_ascii_lowercase(),
    };
    if TRANSIENT_SIGNATURES.iter().any(|sig| message.contains(sig)) {
        FailureClass::TransientLock
    } else {
        FailureClass::Fatal
    }
}

/// Why one capped batch did not produce a row count.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("lock contention persisted after {retries} retries: {source}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: MoveError,
    },
    #[error("fatal failure on attempt {attempt}: {source}")]
    Fatal {
        attempt: u32,
        #[source]
        source: MoveError,
    },
    #[error("cancelled while backing off")]
    Cancelled,
}

/// A worker that stopped on a batch failure, with what it moved before that.
#[derive(Debug, Error)]
#[error("{kind} worker failed on {window} after moving {moved} rows: {cause}")]
pub struct WorkerFailure {
    pub kind: Kind,
    pub window: TimeWindow,
    pub moved: u64,
    #[source]
    pub cause: BatchError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_signatures_are_transient() {
        for msg in [
            "Deadlock found when trying to get lock; try restarting transaction",
            "Lock wait timeout exceeded; try restarting transaction",
            "ERROR: canceling statement due to lock timeout",
            "deadlock detected",
        ] {
            assert_eq!(classify(&MoveError::msg(msg)), FailureClass::TransientLock, "{msg}");
        }
    }

    #[test]
    fn other_failures_are_fatal() {
        for msg in [
            "duplicate key value violates unique constraint",
            "connection refused",
            "column \"foo\" does not exist",
        ] {
            assert_eq!(classify(&MoveError::msg(msg)), FailureClass::Fatal, "{msg}");
        }
        assert_eq!(
            classify(&MoveError::Database(sqlx::Error::PoolTimedOut)),
            FailureClass::Fatal
        );
    }
}
