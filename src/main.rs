use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use httplog_elt::config::EltConfig;
use httplog_elt::elt::planner::{PlanThresholds, WindowPlanner};
use httplog_elt::elt::mysql_mover::MySqlMover;
use httplog_elt::elt::pg_mover::PgMover;
use httplog_elt::elt::tables::TableMapping;
use httplog_elt::elt::{Kind, Mover, RunContext, RunCoordinator, TimeWindow};
use httplog_elt::logging::{init_tracing, DEFAULT_FILTER};
use httplog_elt::scheduler::{coarse_window, log_outcome, run_scheduled};
use httplog_elt::util::db::{Backend, Db, MySqlDb};
use httplog_elt::util::env;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "elt",
    version,
    about = "Incremental order/withdraw log migration",
    long_about = "Incremental order/withdraw log migration.\n\n\
                  The database is chosen from the URL scheme of ELT_DATABASE_URL / DATABASE_URL: \
                  postgres:// or mysql:// (mariadb:// is accepted as an alias)."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct WindowArgs {
    /// Window start (local time, YYYY-MM-DDTHH:MM:SS); defaults to the first day of last month
    #[arg(long, value_parser = parse_local)]
    start: Option<NaiveDateTime>,
    /// Window end (exclusive); defaults to now
    #[arg(long, value_parser = parse_local)]
    end: Option<NaiveDateTime>,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run one migration pass and print the summary as JSON
    RunOnce {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Run a pass every ELT_SCHEDULE_INTERVAL_SECS until Ctrl-C
    Schedule,
    /// Print per-kind missing row counts without moving anything
    Count {
        #[command(flatten)]
        window: WindowArgs,
        /// Only count this kind (order or withdraw)
        #[arg(long)]
        kind: Option<Kind>,
    },
    /// Print the leaf windows the planner would migrate
    Plan {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Print the effective configuration
    ShowConfig,
}

fn parse_local(raw: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| format!("expected YYYY-MM-DDTHH:MM:SS: {e}"))
}

fn resolve_window(args: &WindowArgs, cfg: &EltConfig) -> Result<TimeWindow> {
    let default = coarse_window(cfg)?;
    let start = args.start.unwrap_or(default.start());
    let end = args.end.unwrap_or(default.end());
    Ok(TimeWindow::new(start, end)?)
}

async fn connect_mover(cfg: &EltConfig) -> Result<Arc<dyn Mover>> {
    let database_url = env::db_url().context("set ELT_DATABASE_URL / DATABASE_URL")?;
    let backend = Backend::from_url(&database_url)?;
    let tables = TableMapping::from_env()?;
    info!(?backend, order = ?tables.order, withdraw = ?tables.withdraw, "table mapping");
    let mover: Arc<dyn Mover> = match backend {
        Backend::Postgres => {
            let db = Db::connect(&database_url, cfg.db_max_connections)
                .await
                .context("Db::connect failed")?;
            Arc::new(PgMover::new(db, tables, cfg.lock_timeout_ms))
        }
        Backend::MySql => {
            let db = MySqlDb::connect(&database_url, cfg.db_max_connections)
                .await
                .context("MySqlDb::connect failed")?;
            Arc::new(MySqlMover::new(db, tables, cfg.lock_timeout_ms))
        }
    };
    Ok(mover)
}

/// Kinds selected by an optional `--kind` filter, in dispatch order.
fn selected_kinds(filter: Option<Kind>) -> Vec<Kind> {
    Kind::ALL
        .into_iter()
        .filter(|k| filter.map_or(true, |f| f == *k))
        .collect()
}

/// Cancels the returned token on Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c received, stopping after in-flight batches");
            trigger.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing(DEFAULT_FILTER)?;
    let cli = Cli::parse();

    let cfg = Arc::new(EltConfig::from_env()?);
    env::preflight_check(
        "elt",
        &[],
        &[
            "ELT_DATABASE_URL",
            "DATABASE_URL",
            "ELT_ORDER_SOURCE",
            "ELT_ORDER_DEST",
            "ELT_WITHDRAW_SOURCE",
            "ELT_WITHDRAW_DEST",
        ],
    )?;

    match cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&*cfg)?);
        }
        Commands::RunOnce { window } => {
            if !cfg.enabled {
                warn!("ELT_ENABLED is off; nothing to do");
                return Ok(());
            }
            let window = resolve_window(&window, &cfg)?;
            let mover = connect_mover(&cfg).await?;
            let coordinator = RunCoordinator::new(mover, cfg.clone());
            let outcome = coordinator.run_once(window, shutdown_on_ctrl_c()).await?;
            log_outcome(&outcome);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Schedule => {
            if !cfg.enabled {
                warn!("ELT_ENABLED is off; scheduler not started");
                return Ok(());
            }
            let mover = connect_mover(&cfg).await?;
            let coordinator = Arc::new(RunCoordinator::new(mover, cfg.clone()));
            run_scheduled(coordinator, cfg.clone(), shutdown_on_ctrl_c()).await?;
        }
        Commands::Count { window, kind } => {
            let window = resolve_window(&window, &cfg)?;
            let mover = connect_mover(&cfg).await?;
            for kind in selected_kinds(kind) {
                let missing = mover.count_missing(kind, window).await?;
                println!("{kind}\t{missing}\t{window}");
            }
        }
        Commands::Plan { window } => {
            let window = resolve_window(&window, &cfg)?;
            let mover = connect_mover(&cfg).await?;
            let ctx = RunContext::new(CancellationToken::new());
            let leaves = WindowPlanner::new(PlanThresholds::from_config(&cfg))
                .plan(&*mover, window, &ctx)
                .await?;
            for leaf in &leaves {
                println!("{leaf}\t{}m", leaf.duration().num_minutes());
            }
            info!(run_id = %ctx.run_id, leaves = leaves.len(), "plan printed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_accepts_a_kind_filter() {
        let cli = Cli::try_parse_from(["elt", "count", "--kind", "Withdraw", "--start", "2024-05-01T00:00:00"])
            .unwrap();
        let Commands::Count { window, kind } = cli.command else {
            panic!("expected count");
        };
        assert_eq!(kind, Some(Kind::Withdraw));
        assert_eq!(window.start, Some(parse_local("2024-05-01 00:00:00").unwrap()));
        assert!(Cli::try_parse_from(["elt", "count", "--kind", "deposit"]).is_err());
    }

    #[test]
    fn kind_filter_narrows_dispatch() {
        assert_eq!(selected_kinds(None), Kind::ALL.to_vec());
        assert_eq!(selected_kinds(Some(Kind::Order)), vec![Kind::Order]);
    }
}
