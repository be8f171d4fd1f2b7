//! Postgres-backed `Mover`: anti-join counts and capped `INSERT .. SELECT`
//! batches, one short transaction per batch.
use async_trait::async_trait;
use tracing::{debug, instrument};

use super::error::MoveError;
use super::kind::Kind;
use super::mover::Mover;
use super::tables::TableMapping;
use super::window::TimeWindow;
use crate::util::db::{Backend, Db};

pub struct PgMover {
    db: Db,
    tables: TableMapping,
    lock_timeout_ms: u64,
}

impl PgMover {
    pub fn new(db: Db, tables: TableMapping, lock_timeout_ms: u64) -> Self {
        Self {
            db,
            tables,
            lock_timeout_ms,
        }
    }
}

#[async_trait]
impl Mover for PgMover {
    #[instrument(skip(self, window), fields(%window))]
    async fn count_missing(&self, kind: Kind, window: TimeWindow) -> Result<u64, MoveError> {
        let n: i64 = sqlx::query_scalar(&self.tables.spec(kind).count_sql(Backend::Postgres))
            .persistent(false)
            .bind(window.start())
            .bind(window.end())
            .fetch_one(&self.db.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn move_batch(&self, kind: Kind, window: TimeWindow, cap: u64) -> Result<u64, MoveError> {
        let mut tx = self.db.pool.begin().await?;
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .persistent(false)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query(&self.tables.spec(kind).move_sql(Backend::Postgres))
            .persistent(false)
            .bind(window.start())
            .bind(window.end())
            .bind(i64::try_from(cap).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(%kind, %window, cap, affected = res.rows_affected(), "batch committed");
        Ok(res.rows_affected())
    }
}
