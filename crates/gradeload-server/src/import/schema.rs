//! Schema guard
//!
//! Makes sure the staging and metadata tables exist, and that staging carries
//! every production column plus the origin tag, before the pipeline touches
//! them. A successful check is remembered for the life of the guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use super::types::{ORIGIN_COLUMN, PRODUCTION_TABLE, RECORD_COLUMNS, STAGING_TABLE};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Schema check failed: {0}")]
    Store(#[from] StoreError),

    #[error("Table {table} is missing columns: {cols}", cols = .missing.join(", "))]
    ColumnMismatch { table: String, missing: Vec<String> },
}

pub struct SchemaGuard {
    store: Arc<dyn RecordStore>,
    verified: AtomicBool,
}

impl SchemaGuard {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            verified: AtomicBool::new(false),
        }
    }

    /// Idempotent; after the first success this is a flag read
    #[instrument(skip(self))]
    pub async fn ensure(&self) -> Result<(), SchemaError> {
        if self.verified.load(Ordering::Acquire) {
            return Ok(());
        }

        self.store.ensure_schema().await?;

        let production = self.store.table_columns(PRODUCTION_TABLE).await?;
        missing_columns(PRODUCTION_TABLE, &production, RECORD_COLUMNS.iter().copied())?;

        let staging = self.store.table_columns(STAGING_TABLE).await?;
        let expected = production
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(ORIGIN_COLUMN));
        missing_columns(STAGING_TABLE, &staging, expected)?;

        self.verified.store(true, Ordering::Release);
        info!("Import schema verified");
        Ok(())
    }

    /// Force the next `ensure` to hit the datastore again
    pub fn invalidate(&self) {
        self.verified.store(false, Ordering::Release);
    }
}

fn missing_columns<'a>(
    table: &str,
    actual: &[String],
    expected: impl Iterator<Item = &'a str>,
) -> Result<(), SchemaError> {
    let missing: Vec<String> = expected
        .filter(|column| !actual.iter().any(|a| a.eq_ignore_ascii_case(column)))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::ColumnMismatch {
            table: table.to_string(),
            missing,
        })
    }
}
