//! Gradeload common library
//!
//! Pieces shared by the gradeload server and its one-shot sweep binary:
//!
//! - **Logging**: one place that turns `LOG_*` settings into a tracing subscriber
//! - **Checksums**: SHA-256 fingerprints for uploaded spreadsheets
//! - **Errors**: the error type used by the helpers in this crate
//!
//! # Example
//!
//! ```no_run
//! use gradeload_common::checksum::sha256_hex;
//! use gradeload_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!(checksum = %sha256_hex(b"SNH,Course_ID\n"), "fingerprinted upload");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
