//! Import commands

pub mod clear_staging;
pub mod create_task;
pub mod swap;
pub mod trigger;

pub use clear_staging::ClearStagingCommand;
pub use create_task::{CreateTaskCommand, CreateTaskResponse};
pub use swap::SwapCommand;
pub use trigger::TriggerResponse;
