//! Start a background sweep

use serde::{Deserialize, Serialize};

use crate::import::ImportPipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub accepted: bool,
    pub worker_id: String,
}

/// Never waits on the sweep; a sweep already in progress absorbs this one
pub fn handle(pipeline: ImportPipeline) -> TriggerResponse {
    pipeline.processor.trigger();
    TriggerResponse {
        accepted: true,
        worker_id: pipeline.processor.worker_id().to_string(),
    }
}
