//! Core types for the grade-import pipeline
//!
//! These map onto the `import_tasks`, `import_file_details`, `uploaded_files`
//! and `academic_results*` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Production table readers query
pub const PRODUCTION_TABLE: &str = "academic_results";

/// Staging table that mirrors [`PRODUCTION_TABLE`] plus [`ORIGIN_COLUMN`]
pub const STAGING_TABLE: &str = "academic_results_staging";

/// Hidden staging column holding the `ImportFileDetail` id that wrote the row
pub const ORIGIN_COLUMN: &str = "import_file_id";

/// Record columns, in insert order. Both tables carry exactly these.
pub const RECORD_COLUMNS: [&str; 17] = [
    "snh",
    "semester_offered",
    "current_major",
    "course_id",
    "course_name",
    "grade",
    "grade_remark",
    "course_type",
    "course_attribute",
    "hours",
    "credit",
    "offering_unit",
    "tags",
    "description",
    "exam_type",
    "assessment_method",
    "year",
];

/// Raised when a persisted status string is not one we know
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status '{value}'")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! status_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownStatus { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

status_enum!(TaskStatus, "task", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

status_enum!(FileStatus, "file", {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

status_enum!(UploadStatus, "upload", {
    Uploaded => "uploaded",
    Consumed => "consumed",
    Expired => "expired",
});

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Failed)
    }
}

/// One administrator submission of a set of files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportTask {
    pub id: Uuid,
    pub status: TaskStatus,
    pub total_files: i32,
    /// Derived from the file details at read time
    pub processed_files: i32,
    pub total_records: i64,
    pub imported_records: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportTask {
    pub fn new_pending(total_files: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Pending,
            total_files,
            processed_files: 0,
            total_records: 0,
            imported_records: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Per-file progress row owned by a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportFileDetail {
    pub id: Uuid,
    pub task_id: Uuid,
    pub file_id: Uuid,
    pub file_name: String,
    /// Submission order inside the task; claims go lowest first
    pub position: i32,
    pub status: FileStatus,
    pub records_count: i64,
    pub imported_count: i64,
    pub error_message: Option<String>,
    /// Number of times a sweep has claimed this file
    pub attempts: i32,
    pub claimed_by: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ImportFileDetail {
    pub fn new_pending(task_id: Uuid, upload: &UploadedFile, position: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            file_id: upload.id,
            file_name: upload.original_name.clone(),
            position,
            status: FileStatus::Pending,
            records_count: 0,
            imported_count: 0,
            error_message: None,
            attempts: 0,
            claimed_by: None,
            heartbeat_at: None,
            processed_at: None,
        }
    }

    /// The claim this snapshot was taken under
    pub fn claim(&self) -> FileClaim {
        FileClaim {
            file_id: self.id,
            attempt: self.attempts,
        }
    }
}

/// One claim on a file detail. Every claim bumps `attempts`, so writes made
/// under an older claim no longer match once the file was re-claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileClaim {
    pub file_id: Uuid,
    pub attempt: i32,
}

/// Metadata for a stored spreadsheet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: Uuid,
    pub original_name: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub storage_key: String,
    pub status: UploadStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// Counts written when a file reaches a terminal status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileResult {
    pub records_count: i64,
    pub imported_count: i64,
    pub error_message: Option<String>,
}

/// Totals and message stamped on a task when it becomes terminal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCompletion {
    pub total_records: i64,
    pub imported_records: i64,
    pub error_message: Option<String>,
}

/// One academic result row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicRecord {
    pub snh: String,
    pub semester_offered: Option<String>,
    pub current_major: Option<String>,
    pub course_id: Option<String>,
    pub course_name: Option<String>,
    pub grade: Option<String>,
    pub grade_remark: Option<String>,
    pub course_type: Option<String>,
    pub course_attribute: Option<String>,
    pub hours: Option<String>,
    pub credit: Option<String>,
    pub offering_unit: Option<String>,
    pub tags: Option<String>,
    pub description: Option<String>,
    pub exam_type: Option<String>,
    pub assessment_method: Option<String>,
    pub year: Option<i32>,
}
