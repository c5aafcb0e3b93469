//! Server error type
//!
//! Every handler returns [`AppError`] on failure; it renders as the standard
//! [`ErrorResponse`] body with a stable `code`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::import::cutover::{ClearStagingError, SwapError};
use crate::import::orchestrator::CreateTaskError;
use crate::import::schema::SchemaError;
use crate::import::uploads::UploadError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error("{0}")]
    Unavailable(String),

    #[error("{message}")]
    Internal { code: &'static str, message: String },
}

impl AppError {
    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Internal {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Conflict { code, .. } => code,
            AppError::Unavailable(_) => "UNAVAILABLE",
            AppError::Internal { code, .. } => code,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Request failed: {}", self);
        }
        let body = ErrorResponse::new(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => AppError::Unavailable(message),
            other => AppError::internal("DATASTORE_ERROR", other.to_string()),
        }
    }
}

impl From<SchemaError> for AppError {
    fn from(err: SchemaError) -> Self {
        AppError::internal("SCHEMA_ERROR", err.to_string())
    }
}

impl From<CreateTaskError> for AppError {
    fn from(err: CreateTaskError) -> Self {
        match err {
            CreateTaskError::Empty | CreateTaskError::DuplicateFile(_) => {
                AppError::BadRequest(err.to_string())
            }
            CreateTaskError::FileNotFound(_) => AppError::NotFound(err.to_string()),
            CreateTaskError::FileNotUploaded { .. } => AppError::Conflict {
                code: "FILE_NOT_UPLOADED",
                message: err.to_string(),
            },
            CreateTaskError::Schema(e) => e.into(),
            CreateTaskError::Store(e) => e.into(),
        }
    }
}

impl From<SwapError> for AppError {
    fn from(err: SwapError) -> Self {
        let message = err.to_string();
        match err {
            SwapError::NotFound(_) => AppError::NotFound(message),
            SwapError::AlreadyTerminal { .. } => AppError::Conflict {
                code: "ALREADY_TERMINAL",
                message,
            },
            SwapError::FilesNotTerminal { .. } => AppError::Conflict {
                code: "FILES_NOT_TERMINAL",
                message,
            },
            SwapError::NothingToSwap(_) => AppError::Conflict {
                code: "NOTHING_TO_SWAP",
                message,
            },
            SwapError::Cutover(_) => AppError::internal("SWAP_FAILED", message),
            SwapError::Schema(e) => e.into(),
            SwapError::Store(e) => e.into(),
        }
    }
}

impl From<ClearStagingError> for AppError {
    fn from(err: ClearStagingError) -> Self {
        let message = err.to_string();
        match err {
            ClearStagingError::TaskRunning(_) => AppError::Conflict {
                code: "TASK_RUNNING",
                message,
            },
            ClearStagingError::NotFound(_) => AppError::NotFound(message),
            ClearStagingError::Schema(e) => e.into(),
            ClearStagingError::Store(e) => e.into(),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let message = err.to_string();
        match err {
            UploadError::UnsupportedType(_) | UploadError::Empty => AppError::BadRequest(message),
            UploadError::NotFound(_) => AppError::NotFound(message),
            UploadError::NotUploaded { .. } => AppError::Conflict {
                code: "FILE_NOT_UPLOADED",
                message,
            },
            UploadError::Corrupted(_) => AppError::internal("FILE_CORRUPTED", message),
            UploadError::Storage(_) => AppError::internal("STORAGE_ERROR", message),
            UploadError::Store(e) => e.into(),
        }
    }
}
