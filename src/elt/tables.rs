//! Source/destination table mapping and the SQL each backend runs against it.
use anyhow::{bail, Result};

use super::kind::Kind;
use crate::util::db::Backend;
use crate::util::env::env_opt;

/// Source/destination pair for one kind. Destination must share the source's
/// column layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub source: String,
    pub destination: String,
    pub key_column: String,
    pub time_column: String,
}

impl TableSpec {
    pub fn new(source: &str, destination: &str, key_column: &str, time_column: &str) -> Result<Self> {
        Ok(Self {
            source: checked_ident(source, true)?,
            destination: checked_ident(destination, true)?,
            key_column: checked_ident(key_column, false)?,
            time_column: checked_ident(time_column, false)?,
        })
    }

    /// Binds: window start, window end.
    pub fn count_sql(&self, backend: Backend) -> String {
        let [start, end, _] = placeholders(backend);
        let count = match backend {
            Backend::Postgres => "COUNT(*)::BIGINT",
            Backend::MySql => "COUNT(*)",
        };
        format!(
            "SELECT {count} FROM {src} s \
             WHERE s.{ts} >= {start} AND s.{ts} < {end} \
             AND NOT EXISTS (SELECT 1 FROM {dst} d WHERE d.{key} = s.{key})",
            src = self.source,
            dst = self.destination,
            ts = self.time_column,
            key = self.key_column,
        )
    }

    /// Binds: window start, window end, row cap.
    pub fn move_sql(&self, backend: Backend) -> String {
        let [start, end, cap] = placeholders(backend);
        let select = format!(
            "SELECT s.* FROM {src} s \
             WHERE s.{ts} >= {start} AND s.{ts} < {end} \
             AND NOT EXISTS (SELECT 1 FROM {dst} d WHERE d.{key} = s.{key}) \
             ORDER BY s.{ts}, s.{key} \
             LIMIT {cap}",
            src = self.source,
            dst = self.destination,
            ts = self.time_column,
            key = self.key_column,
        );
        match backend {
            Backend::Postgres => format!("INSERT INTO {} {select} ON CONFLICT DO NOTHING", self.destination),
            Backend::MySql => format!("INSERT IGNORE INTO {} {select}", self.destination),
        }
    }
}

fn placeholders(backend: Backend) -> [&'static str; 3] {
    match backend {
        Backend::Postgres => ["$1", "$2", "$3"],
        Backend::MySql => ["?", "?", "?"],
    }
}

/// Accepts `name` or (when `qualified`) `schema.name`, each part `[A-Za-z_][A-Za-z0-9_]*`.
fn checked_ident(raw: &str, qualified: bool) -> Result<String> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() > if qualified { 2 } else { 1 } {
        bail!("invalid identifier {raw:?}: too many dots");
    }
    for part in &parts {
        let mut chars = part.chars();
        let ok_head = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !ok_head || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            bail!("invalid identifier {raw:?}");
        }
    }
    Ok(raw.to_string())
}

#[derive(Debug, Clone)]
pub struct TableMapping {
    pub order: TableSpec,
    pub withdraw: TableSpec,
}

impl TableMapping {
    pub fn from_env() -> Result<Self> {
        let key = env_opt("ELT_KEY_COLUMN").unwrap_or_else(|| "id".into());
        let ts = env_opt("ELT_TIME_COLUMN").unwrap_or_else(|| "created_at".into());
        let table = |k: &str, default: &str| env_opt(k).unwrap_or_else(|| default.to_string());
        Ok(Self {
            order: TableSpec::new(
                &table("ELT_ORDER_SOURCE", "order_http_log"),
                &table("ELT_ORDER_DEST", "order_http_log_elt"),
                &key,
                &ts,
            )?,
            withdraw: TableSpec::new(
                &table("ELT_WITHDRAW_SOURCE", "withdraw_http_log"),
                &table("ELT_WITHDRAW_DEST", "withdraw_http_log_elt"),
                &key,
                &ts,
            )?,
        })
    }

    pub fn spec(&self, kind: Kind) -> &TableSpec {
        match kind {
            Kind::Order => &self.order,
            Kind::Withdraw => &self.withdraw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TableSpec {
        TableSpec::new("src", "dst", "id", "created_at").unwrap()
    }

    #[test]
    fn accepts_plain_and_schema_qualified_tables() {
        let spec = TableSpec::new("logs.order_http_log", "order_http_log_elt", "id", "created_at").unwrap();
        assert_eq!(spec.source, "logs.order_http_log");
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(TableSpec::new("t; DROP TABLE x", "d", "id", "ts").is_err());
        assert!(TableSpec::new("a.b.c", "d", "id", "ts").is_err());
        assert!(TableSpec::new("src", "dst", "s.id", "ts").is_err());
        assert!(TableSpec::new("1src", "dst", "id", "ts").is_err());
        assert!(TableSpec::new("src", "", "id", "ts").is_err());
    }

    #[test]
    fn postgres_move_is_capped_and_idempotent() {
        let sql = spec().move_sql(Backend::Postgres);
        assert!(sql.starts_with("INSERT INTO dst SELECT s.* FROM src s"));
        assert!(sql.contains("LIMIT $3"));
        assert!(sql.contains("NOT EXISTS (SELECT 1 FROM dst d WHERE d.id = s.id)"));
        assert!(sql.ends_with("ON CONFLICT DO NOTHING"));
        assert!(spec()
            .count_sql(Backend::Postgres)
            .contains("s.created_at >= $1 AND s.created_at < $2"));
    }

    #[test]
    fn mysql_move_uses_positional_binds_and_insert_ignore() {
        let sql = spec().move_sql(Backend::MySql);
        assert!(sql.starts_with("INSERT IGNORE INTO dst SELECT s.* FROM src s"));
        assert!(sql.contains("s.created_at >= ? AND s.created_at < ?"));
        assert!(sql.ends_with("LIMIT ?"));
        assert!(!sql.contains('$'));
        let count = spec().count_sql(Backend::MySql);
        assert!(count.starts_with("SELECT COUNT(*) FROM src s"));
        assert!(!count.contains("::"));
    }
}
