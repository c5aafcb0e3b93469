//! Import pipeline configuration
//!
//! Batch sizes, sweep bounds and timing for the queue processor.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BATCH_SIZE: usize = 200;
const DEFAULT_WORKER_CONCURRENCY: usize = 2;
const DEFAULT_MAX_TASKS_PER_SWEEP: usize = 5;
const DEFAULT_MAX_FILES_PER_SWEEP: usize = 20;
const DEFAULT_SWEEP_DEADLINE_SECS: u64 = 60;
const DEFAULT_FILE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_STALE_AFTER_SECS: u64 = 600;
const DEFAULT_MAX_ATTEMPTS: i32 = 3;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 3600;
const DEFAULT_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Rows per staging insert call
    pub batch_size: usize,
    /// Files ingested concurrently within one sweep
    pub worker_concurrency: usize,
    /// Tasks a single sweep may advance
    pub max_tasks_per_sweep: usize,
    /// Files a single sweep may claim, across tasks
    pub max_files_per_sweep: usize,
    /// A sweep claims in waves of `worker_concurrency` files and starts no
    /// new wave once this much time has passed. 0 means one wave per sweep.
    pub sweep_deadline_secs: u64,
    /// Per-file processing budget
    pub file_timeout_secs: u64,
    /// A `processing` file with no heartbeat for this long is reclaimed
    pub stale_after_secs: u64,
    /// Claims before a stale file is failed instead of requeued
    pub max_attempts: i32,
    /// Whether the server runs the periodic sweeper
    pub sweeper_enabled: bool,
    pub sweep_interval_secs: u64,
    pub purge_interval_secs: u64,
    /// Uploads older than this are purged
    pub retention_days: i64,
    /// Swap as soon as a task is ready instead of waiting for an explicit call
    pub auto_cutover: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ImportConfig {
    /// Load import configuration from `IMPORT_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            batch_size: env_or("IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            worker_concurrency: env_or("IMPORT_WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY),
            max_tasks_per_sweep: env_or("IMPORT_MAX_TASKS_PER_SWEEP", DEFAULT_MAX_TASKS_PER_SWEEP),
            max_files_per_sweep: env_or("IMPORT_MAX_FILES_PER_SWEEP", DEFAULT_MAX_FILES_PER_SWEEP),
            sweep_deadline_secs: env_or("IMPORT_SWEEP_DEADLINE_SECS", DEFAULT_SWEEP_DEADLINE_SECS),
            file_timeout_secs: env_or("IMPORT_FILE_TIMEOUT_SECS", DEFAULT_FILE_TIMEOUT_SECS),
            stale_after_secs: env_or("IMPORT_STALE_AFTER_SECS", DEFAULT_STALE_AFTER_SECS),
            max_attempts: env_or("IMPORT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            sweeper_enabled: env_or("IMPORT_SWEEPER_ENABLED", true),
            sweep_interval_secs: env_or("IMPORT_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS),
            purge_interval_secs: env_or("IMPORT_PURGE_INTERVAL_SECS", DEFAULT_PURGE_INTERVAL_SECS),
            retention_days: env_or("IMPORT_RETENTION_DAYS", DEFAULT_RETENTION_DAYS),
            auto_cutover: env_or("IMPORT_AUTO_CUTOVER", true),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("IMPORT_BATCH_SIZE must be greater than 0");
        }
        if self.worker_concurrency == 0 {
            anyhow::bail!("IMPORT_WORKER_CONCURRENCY must be greater than 0");
        }
        if self.max_tasks_per_sweep == 0 || self.max_files_per_sweep == 0 {
            anyhow::bail!("IMPORT_MAX_TASKS_PER_SWEEP and IMPORT_MAX_FILES_PER_SWEEP must be greater than 0");
        }
        if self.file_timeout_secs == 0 {
            anyhow::bail!("IMPORT_FILE_TIMEOUT_SECS must be greater than 0");
        }
        // a live file must never look stale
        if self.stale_after_secs <= self.file_timeout_secs {
            anyhow::bail!(
                "IMPORT_STALE_AFTER_SECS ({}) must exceed IMPORT_FILE_TIMEOUT_SECS ({})",
                self.stale_after_secs,
                self.file_timeout_secs
            );
        }
        if self.max_attempts < 1 {
            anyhow::bail!("IMPORT_MAX_ATTEMPTS must be at least 1");
        }
        if self.sweep_interval_secs == 0 || self.purge_interval_secs == 0 {
            anyhow::bail!("Sweep and purge intervals must be greater than 0");
        }
        if self.retention_days < 1 {
            anyhow::bail!("IMPORT_RETENTION_DAYS must be at least 1");
        }
        Ok(())
    }

    pub fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.file_timeout_secs)
    }

    pub fn sweep_deadline(&self) -> Duration {
        Duration::from_secs(self.sweep_deadline_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            max_tasks_per_sweep: DEFAULT_MAX_TASKS_PER_SWEEP,
            max_files_per_sweep: DEFAULT_MAX_FILES_PER_SWEEP,
            sweep_deadline_secs: DEFAULT_SWEEP_DEADLINE_SECS,
            file_timeout_secs: DEFAULT_FILE_TIMEOUT_SECS,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sweeper_enabled: true,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            purge_interval_secs: DEFAULT_PURGE_INTERVAL_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            auto_cutover: true,
        }
    }
}
