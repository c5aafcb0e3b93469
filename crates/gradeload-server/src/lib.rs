//! Gradeload server library
//!
//! Bulk import of academic results from uploaded spreadsheets.
//!
//! # Overview
//!
//! Administrators upload spreadsheets, group them into an import task and
//! let the queue processor load them into a staging table. Once every file of
//! the task is terminal, staging replaces the production table in one
//! transaction, so readers see either the old or the new data set.
//!
//! - **Import pipeline** ([`import`]): parsing, staging, task lifecycle, cutover
//! - **Record store** ([`store`]): PostgreSQL via SQLx, or in-memory
//! - **File storage** ([`storage`]): local directory or S3-compatible bucket
//! - **HTTP API** ([`api`], [`features`]): Axum routes under `/api/v1`
//!
//! # Architecture
//!
//! Each HTTP feature is a vertical slice of **commands** (state changes) and
//! **queries** (reads) over the shared [`import::ImportPipeline`]. Background
//! progress comes from [`import::Sweeper`], and from the `gradeload-sweep`
//! binary when an external scheduler drives the queue instead.
//!
//! # Example
//!
//! ```no_run
//! use gradeload_server::{api, config::Config, import, storage::StorageConfig, store};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = store::connect(&config.database).await?;
//!     let storage = StorageConfig::from_env()?.init().await?;
//!     let pipeline = import::ImportPipeline::new(store, storage, import::ImportConfig::from_env()?);
//!     api::serve(api::AppState { pipeline }, &config).await
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod import;
pub mod middleware;
pub mod storage;
pub mod store;

pub use error::AppError;
