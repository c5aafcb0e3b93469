//! Gradeload server - Main entry point

use anyhow::Result;
use gradeload_common::logging::{init_logging, LogConfig};
use tracing::info;

use gradeload_server::{
    api::{self, AppState},
    config::Config,
    import::{ImportConfig, ImportPipeline},
    storage::StorageConfig,
    store,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("gradeload-server")
        .filter_directives("gradeload_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting gradeload server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let import_config = ImportConfig::from_env()?;
    let storage_config = StorageConfig::from_env()?;
    let storage = storage_config.init().await?;
    info!(backend = %storage.describe(), "Upload storage initialized");

    let store = store::connect(&config.database).await?;
    store.ensure_schema().await?;
    info!("Import tables ready");

    let pipeline = ImportPipeline::new(store, storage, import_config);
    pipeline.schema.ensure().await?;

    let sweeper = if pipeline.config.sweeper_enabled {
        Some(pipeline.sweeper().start())
    } else {
        info!("Import sweeper is disabled (IMPORT_SWEEPER_ENABLED=false)");
        None
    };

    api::serve(AppState { pipeline }, &config).await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }

    Ok(())
}
