//! Upload routes
//!
//! - `POST /` multipart upload, field `file`
//! - `GET /` uploads not yet imported
//! - `GET /:file_id` the stored spreadsheet, as an attachment
//! - `DELETE /:file_id` remove bytes and expire the record

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use super::commands::{
    delete::handle as handle_delete, upload::handle as handle_upload, DeleteUploadCommand,
    UploadFileCommand,
};
use super::queries::{
    download::handle as handle_download, list_uploads::handle as handle_list_uploads,
    DownloadUploadQuery,
};
use crate::api::response::ApiResponse;
use crate::error::AppError;
use crate::import::ImportPipeline;

pub fn uploads_routes() -> Router<ImportPipeline> {
    Router::new()
        .route("/", get(list_uploads).post(upload_file))
        .route("/:file_id", get(download_upload).delete(delete_upload))
}

#[tracing::instrument(skip(pipeline, multipart))]
async fn upload_file(
    State(pipeline): State<ImportPipeline>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file bytes: {e}")))?;
        upload = Some((file_name, data.to_vec()));
    }

    let (file_name, content) = upload
        .ok_or_else(|| AppError::BadRequest("No file field found in multipart data".to_string()))?;

    let response = handle_upload(pipeline, UploadFileCommand { file_name, content }).await?;

    tracing::info!(
        file_id = %response.file_id,
        size = response.size,
        checksum = %response.checksum,
        "File uploaded via API"
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))).into_response())
}

async fn list_uploads(State(pipeline): State<ImportPipeline>) -> Result<Response, AppError> {
    let response = handle_list_uploads(pipeline).await?;
    let meta = json!({ "count": response.files.len(), "total_size": response.total_size });
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success_with_meta(response.files, meta)),
    )
        .into_response())
}

fn parse_file_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid file id '{raw}'")))
}

async fn download_upload(
    State(pipeline): State<ImportPipeline>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError> {
    let file_id = parse_file_id(&file_id)?;
    let file = handle_download(pipeline, DownloadUploadQuery { file_id }).await?;

    tracing::debug!(file_id = %file_id, size = file.content.len(), "Upload downloaded via API");

    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.file_name.replace(['"', '\\', '\r', '\n'], "_")
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.content,
    )
        .into_response())
}

#[tracing::instrument(skip(pipeline))]
async fn delete_upload(
    State(pipeline): State<ImportPipeline>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError> {
    let file_id = parse_file_id(&file_id)?;
    let response = handle_delete(pipeline, DeleteUploadCommand { file_id }).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(response))).into_response())
}
