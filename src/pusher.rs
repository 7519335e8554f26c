//! Single-attempt assignee push for one user.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::labeling::{AssigneePush, LabelingService};
use crate::model::TaskId;

/// Status reported when the push never got an HTTP response.
pub const TRANSPORT_FAILURE_STATUS: u16 = 500;

/// Pushes task assignments to the labeling service.
pub struct UpstreamPusher {
    labeling: Arc<dyn LabelingService>,
}

impl UpstreamPusher {
    pub fn new(labeling: Arc<dyn LabelingService>) -> Self {
        Self { labeling }
    }

    /// Assign `task_ids` to `user_id`. Returns the HTTP status; only `200`
    /// means success. No retries happen here.
    pub async fn assign(
        &self,
        user_id: i64,
        task_ids: &[TaskId],
        language: &str,
        project_id: i64,
    ) -> u16 {
        let push = AssigneePush::annotator(user_id, task_ids, language);
        match self.labeling.assign_tasks(project_id, &push).await {
            Ok(status) => {
                debug!(user_id, project_id, status, tasks = task_ids.len(), "Assignee push");
                status
            }
            Err(e) => {
                warn!(user_id, project_id, error = %e, "Assignee push transport failure");
                TRANSPORT_FAILURE_STATUS
            }
        }
    }
}
