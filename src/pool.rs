//! Fetches the pool of unassigned tasks through a project's saved view.
//!
//! The upstream service only filters through a saved view, so fetching a
//! pool overwrites the project's first view. Callers in this process take a
//! per-project lease on that view for the whole fetch.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::LabelingConfig;
use crate::error::LabelingError;
use crate::labeling::{FilterSet, LabelingService};
use crate::locks::KeyedLocks;
use crate::model::TaskPool;
use crate::retry::{self, RetryDecision, RetryError};

/// Fetches the current pool of unassigned tasks for a project+language.
pub struct TaskPoolClient {
    labeling: Arc<dyn LabelingService>,
    config: LabelingConfig,
    view_leases: KeyedLocks<i64>,
}

impl TaskPoolClient {
    pub fn new(labeling: Arc<dyn LabelingService>, config: LabelingConfig) -> Self {
        Self {
            labeling,
            config,
            view_leases: KeyedLocks::new(),
        }
    }

    /// Fetch a fresh pool. Never returns a zero-count pool on failure.
    pub async fn get_pool(&self, project_id: i64, language: &str) -> Result<TaskPool, LabelingError> {
        let _lease = self.view_leases.lock(project_id).await;

        let view_id = self
            .labeling
            .list_views(project_id)
            .await?
            .first()
            .map(|v| v.id)
            .ok_or(LabelingError::NoView { project_id })?;

        self.apply_filter(view_id, project_id, language).await?;

        let page = self
            .labeling
            .list_tasks(view_id, project_id, self.config.page_size)
            .await?;

        if page.total != page.ids.len() as u64 {
            warn!(
                project_id,
                language,
                reported = page.total,
                listed = page.ids.len(),
                "Reported pool size differs from listed task ids"
            );
        }
        info!(project_id, language, total = page.total, "Task pool fetched");

        Ok(TaskPool {
            total_available: page.total,
            task_ids: page.ids,
        })
    }

    /// Overwrite the view filter, retrying per the configured policy.
    async fn apply_filter(
        &self,
        view_id: i64,
        project_id: i64,
        language: &str,
    ) -> Result<(), LabelingError> {
        let filters = FilterSet::unassigned(language);
        let limit = self.config.filter_internal_error_limit;
        let mut internal_errors = 0u32;

        let result = retry::retry(
            &self.config.filter_retry,
            |_| self.labeling.update_view_filter(view_id, project_id, &filters),
            |err, attempt| {
                warn!(project_id, view_id, attempt, error = %err, "View filter update failed");
                if matches!(err, LabelingError::Status { status: 500, .. }) {
                    internal_errors += 1;
                    if internal_errors >= limit {
                        return RetryDecision::Abort;
                    }
                }
                RetryDecision::Retry
            },
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Aborted { .. }) => Err(LabelingError::FilterAborted {
                project_id,
                internal_errors,
            }),
            Err(RetryError::Exhausted {
                attempts, elapsed, ..
            }) => Err(LabelingError::FilterNotApplied {
                project_id,
                attempts,
                elapsed,
            }),
        }
    }
}
