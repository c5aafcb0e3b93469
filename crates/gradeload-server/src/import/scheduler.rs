//! Background sweeper
//!
//! Runs [`QueueProcessor::process_queue`] on a fixed interval and the upload
//! retention purge on a slower one. Triggers from the HTTP surface only wake
//! the processor early; this loop guarantees progress without them.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use super::config::ImportConfig;
use super::processor::QueueProcessor;
use super::uploads::UploadRegistry;

pub struct Sweeper {
    processor: Arc<QueueProcessor>,
    uploads: Arc<UploadRegistry>,
    config: ImportConfig,
}

impl Sweeper {
    pub fn new(
        processor: Arc<QueueProcessor>,
        uploads: Arc<UploadRegistry>,
        config: ImportConfig,
    ) -> Self {
        Self {
            processor,
            uploads,
            config,
        }
    }

    /// Spawn the sweep loop. Abort the handle to stop it.
    pub fn start(self) -> JoinHandle<()> {
        info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            purge_interval_secs = self.config.purge_interval_secs,
            retention_days = self.config.retention_days,
            "Starting import sweeper"
        );

        tokio::spawn(async move {
            let mut sweep = interval(self.config.sweep_interval());
            sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut purge = interval(self.config.purge_interval());
            purge.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        if let Err(e) = self.processor.process_queue().await {
                            error!(error = %e, "Scheduled sweep failed");
                        }
                    }
                    _ = purge.tick() => {
                        if let Err(e) = self.uploads.purge_older_than(self.config.retention()).await {
                            error!(error = %e, "Upload purge failed");
                        }
                    }
                }
            }
        })
    }
}
