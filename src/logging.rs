use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use crate::util::env::{env_flag, env_opt};

/// Library and `elt` binary at info; sqlx statement logs and other crates at warn.
pub const DEFAULT_FILTER: &str = "httplog_elt=info,elt=info,sqlx=warn,warn";

/// `ELT_LOG` first, then `RUST_LOG`, then `default_filter`.
fn filter_directives(elt_log: Option<String>, rust_log: Option<String>, default_filter: &str) -> String {
    [elt_log, rust_log]
        .into_iter()
        .flatten()
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default_filter.to_string())
}

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// Set `ELT_LOG_ANSI=false` when output goes to a log collector.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let directives = filter_directives(env_opt("ELT_LOG"), env_opt("RUST_LOG"), default_filter);
    let filter = EnvFilter::try_new(&directives)
        .map_err(|e| anyhow::anyhow!("invalid log filter {directives:?}: {e}"))?;

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_ansi(env_flag("ELT_LOG_ANSI", true))
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
