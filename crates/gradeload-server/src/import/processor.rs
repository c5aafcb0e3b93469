//! Queue processor
//!
//! One sweep: reclaim stale files, start the next task if none is running,
//! claim its pending files in waves of `worker_concurrency` and ingest each
//! wave concurrently, then settle the task once every file is terminal. No
//! new wave starts past the sweep deadline; unclaimed files stay `pending`. All progress lives in
//! the record store, so a crashed or cut-short sweep is simply continued by
//! the next one.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::config::ImportConfig;
use super::cutover::{CutoverController, SwapError};
use super::ingestor::FileIngestor;
use super::orchestrator::{Readiness, TaskOrchestrator};
use super::schema::{SchemaError, SchemaGuard};
use super::types::{FileStatus, ImportFileDetail};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Another sweep held the gate; nothing was done
    pub skipped: bool,
    pub tasks_visited: usize,
    pub files_completed: usize,
    pub files_failed: usize,
    pub files_timed_out: usize,
    pub files_requeued: u64,
    pub files_abandoned: u64,
    pub tasks_swapped: Vec<Uuid>,
    pub tasks_failed: Vec<Uuid>,
    /// The sweep stopped claiming because its deadline passed
    pub deadline_reached: bool,
}

enum Settled {
    /// Task reached a terminal status; the next one may start
    Done,
    /// Task is still running; later sweeps continue it
    Waiting,
}

pub struct QueueProcessor {
    store: Arc<dyn RecordStore>,
    schema: Arc<SchemaGuard>,
    orchestrator: Arc<TaskOrchestrator>,
    ingestor: Arc<FileIngestor>,
    cutover: Arc<CutoverController>,
    config: ImportConfig,
    worker_id: String,
    gate: Mutex<()>,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        schema: Arc<SchemaGuard>,
        orchestrator: Arc<TaskOrchestrator>,
        ingestor: Arc<FileIngestor>,
        cutover: Arc<CutoverController>,
        config: ImportConfig,
    ) -> Self {
        Self {
            store,
            schema,
            orchestrator,
            ingestor,
            cutover,
            config,
            worker_id: worker_id(),
            gate: Mutex::new(()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run one bounded sweep. Overlapping calls in this process return a
    /// skipped report instead of waiting.
    #[instrument(skip(self), fields(worker = %self.worker_id))]
    pub async fn process_queue(&self) -> Result<SweepReport, SweepError> {
        let Ok(_gate) = self.gate.try_lock() else {
            debug!("Sweep already in progress, skipping");
            return Ok(SweepReport {
                skipped: true,
                ..Default::default()
            });
        };

        self.schema.ensure().await?;
        let mut report = SweepReport::default();

        let stale_before = Utc::now() - self.config.stale_after();
        let reclaimed = self
            .store
            .reclaim_stale_files(stale_before, self.config.max_attempts)
            .await?;
        report.files_requeued = reclaimed.requeued;
        report.files_abandoned = reclaimed.abandoned;
        if reclaimed.requeued > 0 || reclaimed.abandoned > 0 {
            warn!(
                requeued = reclaimed.requeued,
                abandoned = reclaimed.abandoned,
                "Reclaimed stale files"
            );
        }

        let started = Instant::now();
        let deadline = self.config.sweep_deadline();
        let mut budget = self.config.max_files_per_sweep;
        for _ in 0..self.config.max_tasks_per_sweep {
            let Some(task) = self.orchestrator.activate_next().await? else {
                break;
            };
            report.tasks_visited += 1;

            while budget > 0 {
                let wave = budget.min(self.config.worker_concurrency);
                let claimed = self
                    .store
                    .claim_files(task.id, wave as i64, &self.worker_id)
                    .await?;
                if claimed.is_empty() {
                    break;
                }
                debug!(task_id = %task.id, files = claimed.len(), "Claimed files");
                budget = budget.saturating_sub(claimed.len());
                self.run_files(claimed, &mut report).await;

                if started.elapsed() >= deadline {
                    report.deadline_reached = true;
                    break;
                }
            }

            match self.settle(task.id, &mut report).await? {
                Settled::Done if budget > 0 && !report.deadline_reached => continue,
                _ => break,
            }
        }

        info!(
            tasks = report.tasks_visited,
            completed = report.files_completed,
            failed = report.files_failed,
            swapped = report.tasks_swapped.len(),
            deadline_reached = report.deadline_reached,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Start a sweep in the background and return at once
    pub fn trigger(self: &Arc<Self>) {
        let processor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = processor.process_queue().await {
                error!(error = %e, "Triggered sweep failed");
            }
        });
    }

    async fn run_files(&self, claimed: Vec<ImportFileDetail>, report: &mut SweepReport) {
        let timeout = self.config.file_timeout();
        let outcomes: Vec<(FileStatus, bool)> = stream::iter(claimed)
            .map(|detail| async move {
                match tokio::time::timeout(timeout, self.ingestor.ingest_file(&detail)).await {
                    Ok(outcome) => (outcome.status, false),
                    Err(_) => {
                        warn!(
                            file_detail_id = %detail.id,
                            file = %detail.file_name,
                            "File exceeded its time budget"
                        );
                        let message = format!("timed out after {}s", timeout.as_secs());
                        self.ingestor.abandon(&detail, message).await;
                        (FileStatus::Failed, true)
                    }
                }
            })
            .buffer_unordered(self.config.worker_concurrency)
            .collect()
            .await;

        for (status, timed_out) in outcomes {
            match status {
                FileStatus::Completed => report.files_completed += 1,
                FileStatus::Failed => report.files_failed += 1,
                _ => {}
            }
            if timed_out {
                report.files_timed_out += 1;
            }
        }
    }

    async fn settle(&self, task_id: Uuid, report: &mut SweepReport) -> Result<Settled, SweepError> {
        match self.orchestrator.readiness(task_id).await? {
            Readiness::InProgress { unfinished } => {
                debug!(task_id = %task_id, unfinished, "Task still has unfinished files");
                Ok(Settled::Waiting)
            }
            Readiness::NoRows(completion) => {
                if self.orchestrator.fail_task(task_id, &completion).await? {
                    report.tasks_failed.push(task_id);
                }
                Ok(Settled::Done)
            }
            Readiness::Ready(_) if !self.config.auto_cutover => {
                debug!(task_id = %task_id, "Task ready, waiting for an explicit swap");
                Ok(Settled::Waiting)
            }
            Readiness::Ready(_) => match self.cutover.swap(task_id).await {
                Ok(_) => {
                    report.tasks_swapped.push(task_id);
                    Ok(Settled::Done)
                }
                Err(e @ (SwapError::Cutover(_) | SwapError::NothingToSwap(_))) => {
                    warn!(task_id = %task_id, error = %e, "Automatic cutover failed the task");
                    report.tasks_failed.push(task_id);
                    Ok(Settled::Done)
                }
                Err(SwapError::AlreadyTerminal { .. } | SwapError::NotFound(_)) => Ok(Settled::Done),
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Automatic cutover deferred");
                    Ok(Settled::Waiting)
                }
            },
        }
    }
}

fn worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "gradeload".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}
