//! Feature slices of the HTTP API
//!
//! Each feature is a vertical slice:
//! - `commands/` - operations that change state
//! - `queries/` - read operations
//! - `routes.rs` - HTTP route definitions
//!
//! # Features
//!
//! - **imports**: import tasks, progress, cutover and processing triggers
//! - **uploads**: spreadsheet upload and retention

pub mod imports;
pub mod uploads;

use axum::Router;

use crate::import::ImportPipeline;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub pipeline: ImportPipeline,
}

/// Mount every feature under its path prefix:
/// - `/imports` - task lifecycle
/// - `/uploads` - uploaded spreadsheets
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .nest(
            "/imports",
            imports::imports_routes().with_state(state.pipeline.clone()),
        )
        .nest(
            "/uploads",
            uploads::uploads_routes().with_state(state.pipeline),
        )
}
