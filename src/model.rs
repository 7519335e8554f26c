//! Core data types shared by the allocator and the store.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Language value meaning "do not narrow by language".
pub const ALL_LANGUAGES: &str = "all";

/// Returns true if `language` is the "all languages" sentinel.
pub fn is_all_languages(language: &str) -> bool {
    language.eq_ignore_ascii_case(ALL_LANGUAGES)
}

/// Opaque upstream task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of the tasks currently eligible for assignment.
///
/// `total_available` is what upstream reports; it may differ from
/// `task_ids.len()` and the capacity guard trusts the reported figure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPool {
    pub total_available: u64,
    pub task_ids: Vec<TaskId>,
}

/// A developer from the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeveloperRecord {
    /// Labeling-service user id.
    pub user_id: i64,
    pub user_email: String,
    pub location: Option<String>,
    pub skillsets: BTreeSet<String>,
}

/// One immutable audit-log entry for a processed user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentOutcome {
    pub user_email: String,
    pub user_id: i64,
    pub assigned_count: u32,
    /// `None` is the empty marker written for zero-count assignments.
    pub task_ids: Option<Vec<TaskId>>,
    pub language: String,
    pub project_id: i64,
    pub timestamp: DateTime<Utc>,
}

/// Status of a tracked work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
    Done,
    Rewrite,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "Not Started",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Done => "Done",
            Self::Rewrite => "Rewrite",
        }
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Not Started" => Ok(Self::NotStarted),
            "In Progress" => Ok(Self::InProgress),
            "Completed" => Ok(Self::Completed),
            "Done" => Ok(Self::Done),
            "Rewrite" => Ok(Self::Rewrite),
            other => Err(format!("unknown work status: {other}")),
        }
    }
}

/// A task handed to a developer, tracked by the downstream review flow.
///
/// Review-stage fields start out empty and are owned by that flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub task_id: TaskId,
    pub user_email: String,
    pub user_id: i64,
    pub status: WorkStatus,
    pub language: String,
    pub project_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub batch_id: Option<String>,
    pub total_annotations: i64,
    pub rev_id: Option<i64>,
    pub comments: Option<String>,
}

impl WorkItem {
    /// A freshly assigned, not yet started item.
    pub fn not_started(
        task_id: TaskId,
        developer: &DeveloperRecord,
        language: &str,
        project_id: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            user_email: developer.user_email.clone(),
            user_id: developer.user_id,
            status: WorkStatus::NotStarted,
            language: language.to_string(),
            project_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
            batch_id: None,
            total_annotations: 0,
            rev_id: None,
            comments: None,
        }
    }
}
