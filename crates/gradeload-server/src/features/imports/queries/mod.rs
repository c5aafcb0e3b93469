//! Import queries

pub mod get_task_status;
pub mod list_tasks;

pub use get_task_status::{GetTaskStatusError, GetTaskStatusQuery};
pub use list_tasks::{ListTasksError, ListTasksQuery, ListTasksResponse};
