//! Async persistence interface.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{AssignmentOutcome, DeveloperRecord, WorkItem};

/// Directory role that receives annotation work.
pub const DEVELOPER_ROLE: &str = "Developer";

/// An audit-log row as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoredAssignment {
    pub id: i64,
    #[serde(flatten)]
    pub outcome: AssignmentOutcome,
}

/// Backend-agnostic database trait for the user directory, the assignment
/// audit log, and work items.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── User directory ──────────────────────────────────────────────

    /// Insert or replace a directory entry.
    async fn upsert_developer(
        &self,
        developer: &DeveloperRecord,
        role: &str,
    ) -> Result<(), DatabaseError>;

    /// All active users with the `Developer` role.
    async fn list_developers(&self) -> Result<Vec<DeveloperRecord>, DatabaseError>;

    // ── Assignment log ──────────────────────────────────────────────

    /// Append one audit row and its work items atomically.
    /// Returns the audit row id.
    async fn append_assignment(
        &self,
        outcome: &AssignmentOutcome,
        work_items: &[WorkItem],
    ) -> Result<i64, DatabaseError>;

    /// Most recent audit rows first, optionally for one project.
    async fn list_assignments(
        &self,
        project_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredAssignment>, DatabaseError>;

    // ── Work items ──────────────────────────────────────────────────

    /// Work items for a project, oldest first.
    async fn list_work_items(&self, project_id: i64) -> Result<Vec<WorkItem>, DatabaseError>;
}
