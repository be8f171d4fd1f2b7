//! MySQL/MariaDB `Mover`: same contract as the Postgres one, using
//! `INSERT IGNORE .. SELECT .. LIMIT` so already-copied keys are skipped.
use async_trait::async_trait;
use tracing::{debug, instrument};

use super::error::MoveError;
use super::kind::Kind;
use super::mover::Mover;
use super::tables::TableMapping;
use super::window::TimeWindow;
use crate::util::db::{Backend, MySqlDb};

pub struct MySqlMover {
    db: MySqlDb,
    tables: TableMapping,
    lock_wait_secs: u64,
}

/// `innodb_lock_wait_timeout` only takes whole seconds.
fn lock_wait_secs(lock_timeout_ms: u64) -> u64 {
    lock_timeout_ms.div_ceil(1000).max(1)
}

impl MySqlMover {
    pub fn new(db: MySqlDb, tables: TableMapping, lock_timeout_ms: u64) -> Self {
        Self {
            db,
            tables,
            lock_wait_secs: lock_wait_secs(lock_timeout_ms),
        }
    }
}

#[async_trait]
impl Mover for MySqlMover {
    #[instrument(skip(self, window), fields(%window))]
    async fn count_missing(&self, kind: Kind, window: TimeWindow) -> Result<u64, MoveError> {
        let n: i64 = sqlx::query_scalar(&self.tables.spec(kind).count_sql(Backend::MySql))
            .persistent(false)
            .bind(window.start())
            .bind(window.end())
            .fetch_one(&self.db.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn move_batch(&self, kind: Kind, window: TimeWindow, cap: u64) -> Result<u64, MoveError> {
        let mut tx = self.db.pool.begin().await?;
        // Session scoped in MySQL; re-set per batch since pooled connections are shared.
        sqlx::query(&format!("SET SESSION innodb_lock_wait_timeout = {}", self.lock_wait_secs))
            .persistent(false)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query(&self.tables.spec(kind).move_sql(Backend::MySql))
            .persistent(false)
            .bind(window.start())
            .bind(window.end())
            .bind(cap)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(%kind, %window, cap, affected = res.rows_affected(), "batch committed");
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_wait_rounds_up_to_whole_seconds() {
        assert_eq!(lock_wait_secs(5_000), 5);
        assert_eq!(lock_wait_secs(1_500), 2);
        assert_eq!(lock_wait_secs(0), 1);
    }
}
