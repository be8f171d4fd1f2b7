//! Runtime configuration for the log migration, read from the environment.
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::Serialize;
use tracing::warn;

use crate::util::env::{env_flag, env_opt, env_parse, env_parse_opt};

#[derive(Debug, Clone, Serialize)]
pub struct EltConfig {
    pub enabled: bool,
    /// Row cap per batch; also the ceiling of the adaptive size.
    pub batch_size: u64,
    pub max_batches_per_run: u32,
    pub pause_ms: u64,
    /// Concurrent kind workers per run (two streams, so 2 is enough).
    pub worker_threads: usize,
    pub max_retry: u32,
    pub retry_backoff_base_ms: u64,
    pub slow_batch_ms: u64,
    pub half_day_switch_threshold: u64,
    pub hour_switch_threshold: u64,
    /// Split a window when `ceil(backlog / batch_size)` exceeds this. Unset disables.
    pub max_batches_before_split: Option<u64>,
    #[serde(serialize_with = "serialize_offset")]
    pub utc_offset: FixedOffset,
    pub schedule_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub lock_timeout_ms: u64,
    pub db_max_connections: u32,
}

fn serialize_offset<S: serde::Serializer>(offset: &FixedOffset, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(offset)
}

impl Default for EltConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10_000,
            max_batches_per_run: 200,
            pause_ms: 150,
            worker_threads: 2,
            max_retry: 5,
            retry_backoff_base_ms: 200,
            slow_batch_ms: 1_500,
            half_day_switch_threshold: 200_000,
            hour_switch_threshold: 50_000,
            max_batches_before_split: None,
            utc_offset: FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
            schedule_interval_secs: 300,
            shutdown_grace_secs: 30,
            lock_timeout_ms: 5_000,
            db_max_connections: 4,
        }
    }
}

impl EltConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let utc_offset = match env_opt("ELT_UTC_OFFSET") {
            Some(raw) => raw
                .trim()
                .parse::<FixedOffset>()
                .map_err(|e| anyhow::anyhow!("invalid ELT_UTC_OFFSET {raw:?}: {e}"))?,
            None => d.utc_offset,
        };
        let cfg = Self {
            enabled: env_flag("ELT_ENABLED", d.enabled),
            batch_size: env_parse("ELT_BATCH_SIZE", d.batch_size),
            max_batches_per_run: env_parse("ELT_MAX_BATCHES_PER_RUN", d.max_batches_per_run),
            pause_ms: env_parse("ELT_PAUSE_MS", d.pause_ms),
            worker_threads: env_parse("ELT_WORKER_THREADS", d.worker_threads).max(1),
            max_retry: env_parse("ELT_MAX_RETRY", d.max_retry),
            retry_backoff_base_ms: env_parse("ELT_RETRY_BACKOFF_BASE_MS", d.retry_backoff_base_ms),
            slow_batch_ms: env_parse("ELT_SLOW_BATCH_MS", d.slow_batch_ms),
            half_day_switch_threshold: env_parse(
                "ELT_HALF_DAY_SWITCH_THRESHOLD",
                d.half_day_switch_threshold,
            ),
            hour_switch_threshold: env_parse("ELT_HOUR_SWITCH_THRESHOLD", d.hour_switch_threshold),
            max_batches_before_split: env_parse_opt("ELT_MAX_BATCHES_BEFORE_SPLIT"),
            utc_offset,
            schedule_interval_secs: env_parse("ELT_SCHEDULE_INTERVAL_SECS", d.schedule_interval_secs),
            shutdown_grace_secs: env_parse("ELT_SHUTDOWN_GRACE_SECS", d.shutdown_grace_secs),
            lock_timeout_ms: env_parse("ELT_LOCK_TIMEOUT_MS", d.lock_timeout_ms),
            db_max_connections: env_parse("DB_MAX_CONNS", d.db_max_connections),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("ELT_BATCH_SIZE must be > 0");
        }
        if self.max_batches_per_run == 0 {
            bail!("ELT_MAX_BATCHES_PER_RUN must be > 0");
        }
        if self.slow_batch_ms == 0 {
            bail!("ELT_SLOW_BATCH_MS must be > 0");
        }
        if self.schedule_interval_secs == 0 {
            bail!("ELT_SCHEDULE_INTERVAL_SECS must be > 0");
        }
        if self.hour_switch_threshold > self.half_day_switch_threshold {
            warn!(
                target = "config",
                hour = self.hour_switch_threshold,
                half_day = self.half_day_switch_threshold,
                "hour threshold above half-day threshold; half-days will rarely split"
            );
        }
        Ok(())
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms)
    }

    pub fn slow_batch(&self) -> Duration {
        Duration::from_millis(self.slow_batch_ms)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EltConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.utc_offset.local_minus_utc(), 8 * 3600);
        assert_eq!(cfg.pause(), Duration::from_millis(150));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let cfg = EltConfig {
            batch_size: 0,
            ..EltConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn offset_serializes_as_string() {
        let json = serde_json::to_value(EltConfig::default()).unwrap();
        assert_eq!(json["utc_offset"], "+08:00");
    }
}
