//! Imports feature module
//!
//! Create import tasks, follow their progress, trigger processing and
//! promote staged rows to production.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::imports_routes;
