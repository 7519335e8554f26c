//! Writes the per-user audit row and seeds work items for assigned tasks.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{AssignmentOutcome, DeveloperRecord, TaskId, WorkItem};
use crate::store::Database;

/// What was written for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordResult {
    pub log_id: i64,
    pub outcome: AssignmentOutcome,
    pub work_items_created: usize,
}

/// Writes assignment outcomes to durable storage.
pub struct AssignmentRecorder {
    db: Arc<dyn Database>,
}

impl AssignmentRecorder {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Record that `developer` was given `task_ids` (requested `count`).
    ///
    /// A zero count writes the audit row with the empty marker and no work
    /// items. Seeded work items carry `run_id` as their batch id. Errors
    /// propagate to the caller.
    pub async fn record(
        &self,
        run_id: Uuid,
        count: u32,
        developer: &DeveloperRecord,
        task_ids: &[TaskId],
        language: &str,
        project_id: i64,
    ) -> Result<RecordResult, DatabaseError> {
        let now = Utc::now();
        let outcome = AssignmentOutcome {
            user_email: developer.user_email.clone(),
            user_id: developer.user_id,
            assigned_count: count,
            task_ids: (count != 0).then(|| task_ids.to_vec()),
            language: language.to_string(),
            project_id,
            timestamp: now,
        };

        let work_items: Vec<WorkItem> = if count != 0 && !task_ids.is_empty() {
            task_ids
                .iter()
                .map(|id| WorkItem {
                    batch_id: Some(run_id.to_string()),
                    ..WorkItem::not_started(*id, developer, language, project_id, now)
                })
                .collect()
        } else {
            Vec::new()
        };

        let log_id = self.db.append_assignment(&outcome, &work_items).await?;
        info!(
            log_id,
            %run_id,
            user = %developer.user_email,
            count,
            work_items = work_items.len(),
            "Assignment recorded"
        );

        Ok(RecordResult {
            log_id,
            outcome,
            work_items_created: work_items.len(),
        })
    }
}
