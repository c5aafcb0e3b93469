//! Uploads feature module
//!
//! Spreadsheets are uploaded here first; import tasks reference them by id.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::uploads_routes;
