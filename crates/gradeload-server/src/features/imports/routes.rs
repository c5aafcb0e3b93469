//! Import routes
//!
//! - `POST /tasks` create a task
//! - `GET /tasks` task history
//! - `GET /tasks/:task_id` progress with per-file detail
//! - `POST /tasks/:task_id/swap` promote staging to production
//! - `POST /process` start a sweep (202)
//! - `POST /staging/clear` empty staging, optionally resetting a task

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use super::commands::{
    clear_staging::handle as handle_clear_staging, create_task::handle as handle_create_task,
    swap::handle as handle_swap, trigger::handle as handle_trigger, ClearStagingCommand,
    CreateTaskCommand, SwapCommand,
};
use super::queries::{
    get_task_status::handle as handle_get_task_status, list_tasks::handle as handle_list_tasks,
    GetTaskStatusQuery, ListTasksQuery,
};
use crate::api::response::ApiResponse;
use crate::error::AppError;
use crate::import::ImportPipeline;

pub fn imports_routes() -> Router<ImportPipeline> {
    Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/:task_id", get(get_task))
        .route("/tasks/:task_id/swap", post(swap_task))
        .route("/process", post(trigger_processing))
        .route("/staging/clear", post(clear_staging))
}

/// An absent or empty body means "all defaults"
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {e}")))
}

fn parse_task_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid task id '{raw}'")))
}

/// POST /tasks
#[tracing::instrument(skip(pipeline, body))]
async fn create_task(
    State(pipeline): State<ImportPipeline>,
    body: Bytes,
) -> Result<Response, AppError> {
    let command: CreateTaskCommand = optional_json(&body)?;
    let response = handle_create_task(pipeline, command).await?;

    tracing::info!(task_id = %response.task_id, total_files = response.total_files, "Import task created via API");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))).into_response())
}

/// GET /tasks?status=running&limit=20
async fn list_tasks(
    State(pipeline): State<ImportPipeline>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Response, AppError> {
    let response = handle_list_tasks(pipeline, query).await?;
    let meta = json!({ "count": response.count });
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success_with_meta(response.tasks, meta)),
    )
        .into_response())
}

/// GET /tasks/:task_id
async fn get_task(
    State(pipeline): State<ImportPipeline>,
    Path(task_id): Path<String>,
) -> Result<Response, AppError> {
    let query = GetTaskStatusQuery {
        task_id: parse_task_id(&task_id)?,
    };
    let report = handle_get_task_status(pipeline, query).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(report))).into_response())
}

/// POST /tasks/:task_id/swap
#[tracing::instrument(skip(pipeline))]
async fn swap_task(
    State(pipeline): State<ImportPipeline>,
    Path(task_id): Path<String>,
) -> Result<Response, AppError> {
    let command = SwapCommand {
        task_id: parse_task_id(&task_id)?,
    };
    let report = handle_swap(pipeline, command).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(report))).into_response())
}

/// POST /process
async fn trigger_processing(State(pipeline): State<ImportPipeline>) -> Response {
    let response = handle_trigger(pipeline);
    (StatusCode::ACCEPTED, Json(ApiResponse::success(response))).into_response()
}

/// POST /staging/clear
#[tracing::instrument(skip(pipeline, body))]
async fn clear_staging(
    State(pipeline): State<ImportPipeline>,
    body: Bytes,
) -> Result<Response, AppError> {
    let command: ClearStagingCommand = optional_json(&body)?;
    let report = handle_clear_staging(pipeline, command).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(report))).into_response())
}
