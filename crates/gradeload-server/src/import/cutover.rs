//! Cutover controller
//!
//! The only writer of the production table. `swap` replaces production with
//! staging inside one datastore transaction, so readers see either the old
//! dataset or the new one.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::orchestrator::{assess, Readiness};
use super::schema::{SchemaError, SchemaGuard};
use super::types::{TaskCompletion, TaskStatus};
use crate::store::{RecordStore, StoreError, SwapOutcome};

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("Task not found: {0}")]
    NotFound(Uuid),

    #[error("Task {task_id} is already {status}")]
    AlreadyTerminal { task_id: Uuid, status: TaskStatus },

    #[error("Files not terminal: {unfinished} files of task {task_id} are still pending or processing")]
    FilesNotTerminal { task_id: Uuid, unfinished: i64 },

    #[error("Nothing to swap: {0}")]
    NothingToSwap(String),

    #[error("Swap failed, production unchanged: {0}")]
    Cutover(StoreError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ClearStagingError {
    #[error("Task {0} is running; staging belongs to it")]
    TaskRunning(Uuid),

    #[error("Task not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapReport {
    pub task_id: Uuid,
    pub rows: u64,
    pub imported_records: i64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearReport {
    /// Task returned to `pending`, if one was named
    pub reset_task_id: Option<Uuid>,
}

pub struct CutoverController {
    store: Arc<dyn RecordStore>,
    schema: Arc<SchemaGuard>,
}

impl CutoverController {
    pub fn new(store: Arc<dyn RecordStore>, schema: Arc<SchemaGuard>) -> Self {
        Self { store, schema }
    }

    /// Promote staging to production for a running task whose files are all
    /// terminal. A task with nothing staged is failed instead.
    #[instrument(skip(self))]
    pub async fn swap(&self, task_id: Uuid) -> Result<SwapReport, SwapError> {
        self.schema.ensure().await?;

        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(SwapError::NotFound(task_id))?;
        if task.status.is_terminal() {
            return Err(SwapError::AlreadyTerminal {
                task_id,
                status: task.status,
            });
        }

        let files = self.store.list_file_details(task_id).await?;
        let completion = match assess(&files) {
            Readiness::InProgress { unfinished } => {
                return Err(SwapError::FilesNotTerminal {
                    task_id,
                    unfinished: unfinished as i64,
                })
            }
            Readiness::NoRows(completion) => {
                let reason = completion
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "no valid rows were imported".to_string());
                self.fail(task_id, completion).await;
                return Err(SwapError::NothingToSwap(reason));
            }
            Readiness::Ready(completion) => completion,
        };

        match self.store.replace_production(task_id, &completion).await {
            Ok(SwapOutcome::Swapped { rows }) => {
                info!(task_id = %task_id, rows, "Cutover complete");
                Ok(SwapReport {
                    task_id,
                    rows,
                    imported_records: completion.imported_records,
                    error_message: completion.error_message,
                })
            }
            Ok(SwapOutcome::TaskMissing) => Err(SwapError::NotFound(task_id)),
            Ok(SwapOutcome::TaskNotRunning(status)) if status.is_terminal() => {
                Err(SwapError::AlreadyTerminal { task_id, status })
            }
            Ok(SwapOutcome::TaskNotRunning(_)) | Ok(SwapOutcome::FilesNotTerminal(_)) => {
                let unfinished = self.store.count_unfinished_files(task_id).await?;
                Err(SwapError::FilesNotTerminal {
                    task_id,
                    unfinished,
                })
            }
            Ok(SwapOutcome::NothingStaged) => {
                let reason = "staging was empty at cutover".to_string();
                self.fail(
                    task_id,
                    TaskCompletion {
                        error_message: Some(reason.clone()),
                        ..completion
                    },
                )
                .await;
                Err(SwapError::NothingToSwap(reason))
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Cutover failed, production unchanged");
                self.fail(
                    task_id,
                    TaskCompletion {
                        error_message: Some(format!("cutover failed: {e}")),
                        ..completion
                    },
                )
                .await;
                Err(SwapError::Cutover(e))
            }
        }
    }

    /// Truncate staging. With `reset_task_id`, also return that task and its
    /// files to `pending` so it loads again from scratch. Refused while a
    /// task is running.
    #[instrument(skip(self))]
    pub async fn clear_staging(
        &self,
        reset_task_id: Option<Uuid>,
    ) -> Result<ClearReport, ClearStagingError> {
        self.schema.ensure().await?;

        if let Some(running) = self.store.running_task().await? {
            return Err(ClearStagingError::TaskRunning(running.id));
        }

        match reset_task_id {
            Some(task_id) => {
                if self.store.get_task(task_id).await?.is_none() {
                    return Err(ClearStagingError::NotFound(task_id));
                }
                if !self.store.reset_task(task_id).await? {
                    return Err(ClearStagingError::TaskRunning(task_id));
                }
                info!(task_id = %task_id, "Task reset, staging cleared");
            }
            None => {
                self.store.truncate_staging().await?;
                info!("Staging cleared");
            }
        }

        Ok(ClearReport { reset_task_id })
    }

    async fn fail(&self, task_id: Uuid, completion: TaskCompletion) {
        match self
            .store
            .finish_task(task_id, TaskStatus::Failed, &completion)
            .await
        {
            Ok(true) => warn!(task_id = %task_id, "Task marked failed at cutover"),
            Ok(false) => warn!(task_id = %task_id, "Task was no longer running"),
            Err(e) => error!(task_id = %task_id, error = %e, "Could not mark task failed"),
        }
    }
}
