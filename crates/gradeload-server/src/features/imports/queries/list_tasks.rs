//! Task history, newest first

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::import::types::{ImportTask, TaskStatus, UnknownStatus};
use crate::import::ImportPipeline;
use crate::store::StoreError;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTasksQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<ImportTask>,
    pub count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ListTasksError {
    #[error("Invalid status filter: {0}")]
    InvalidStatus(#[from] UnknownStatus),

    #[error("Limit must be between 1 and 500")]
    InvalidLimit,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ListTasksError> for AppError {
    fn from(err: ListTasksError) -> Self {
        match err {
            ListTasksError::InvalidStatus(_) | ListTasksError::InvalidLimit => {
                AppError::BadRequest(err.to_string())
            }
            ListTasksError::Store(e) => e.into(),
        }
    }
}

impl ListTasksQuery {
    pub fn validate(&self) -> Result<(Option<TaskStatus>, i64), ListTasksError> {
        let status = self
            .status
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase().parse::<TaskStatus>())
            .transpose()?;
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ListTasksError::InvalidLimit);
        }
        Ok((status, limit))
    }
}

pub async fn handle(
    pipeline: ImportPipeline,
    query: ListTasksQuery,
) -> Result<ListTasksResponse, ListTasksError> {
    let (status, limit) = query.validate()?;
    let tasks = pipeline.orchestrator.list_tasks(status, limit).await?;
    Ok(ListTasksResponse {
        count: tasks.len(),
        tasks,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let (status, limit) = ListTasksQuery::default().validate().unwrap();
        assert!(status.is_none());
        assert_eq!(limit, DEFAULT_LIMIT);
    }

    #[test]
    fn test_status_filter_is_case_insensitive() {
        let query = ListTasksQuery {
            status: Some("Running".to_string()),
            limit: Some(10),
        };
        let (status, limit) = query.validate().unwrap();
        assert_eq!(status, Some(TaskStatus::Running));
        assert_eq!(limit, 10);
    }

    #[test]
    fn test_rejects_unknown_status_and_bad_limit() {
        let query = ListTasksQuery {
            status: Some("queued".to_string()),
            limit: None,
        };
        assert!(matches!(
            query.validate(),
            Err(ListTasksError::InvalidStatus(_))
        ));

        let query = ListTasksQuery {
            status: None,
            limit: Some(0),
        };
        assert!(matches!(query.validate(), Err(ListTasksError::InvalidLimit)));
    }
}
