//! Slices one pool snapshot across users and drives the per-user
//! push-then-record pipeline.
//!
//! Only a failed pool fetch or a capacity overrun aborts a run. Every
//! per-user failure is logged, reported in the results, and skipped.
//!
//! Replaying the same request against the same upstream state is not
//! idempotent: the pool carries no reservations, so a second run hands out
//! whatever upstream still reports as unassigned.

pub mod cursor;
pub mod request;

pub use cursor::{Batch, BatchState, PoolCursor};
pub use request::{AssignTasksBody, AssignmentRequest};

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AllocationError;
use crate::locks::KeyedLocks;
use crate::model::{DeveloperRecord, TaskId};
use crate::pool::TaskPoolClient;
use crate::pusher::UpstreamPusher;
use crate::recorder::AssignmentRecorder;
use crate::store::Database;

pub const POOL_FAILURE_MESSAGE: &str = "Task assignment failed. Please try again.";
pub const SUCCESS_MESSAGE: &str = "All tasks have been successfully assigned.";

/// What happened to one user in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Pushed upstream and recorded.
    Assigned,
    /// Count was zero; audit row written with the empty marker.
    ZeroRecorded,
    /// Email not in the developer directory.
    UserNotFound,
    /// Pool had nothing left for this user.
    PoolExhausted,
    /// Upstream did not acknowledge the push.
    PushFailed,
    /// Upstream accepted but the local write failed.
    RecordFailed,
}

/// Per-user entry in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserResult {
    pub user_email: String,
    pub requested: u32,
    pub status: UserStatus,
    pub task_ids: Vec<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl UserResult {
    fn new(user_email: &str, requested: u32, status: UserStatus) -> Self {
        Self {
            user_email: user_email.to_string(),
            requested,
            status,
            task_ids: Vec::new(),
            detail: None,
        }
    }

    fn with_tasks(mut self, task_ids: Vec<TaskId>) -> Self {
        self.task_ids = task_ids;
        self
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Aggregate verdict plus per-user results.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationReport {
    pub error: bool,
    pub message: String,
    pub results: Vec<UserResult>,
}

impl AllocationReport {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            results: Vec::new(),
        }
    }
}

/// Runs allocations. One run per project at a time.
pub struct AssignmentAllocator {
    pool: TaskPoolClient,
    pusher: UpstreamPusher,
    recorder: AssignmentRecorder,
    directory: Arc<dyn Database>,
    runs: KeyedLocks<i64>,
}

impl AssignmentAllocator {
    pub fn new(
        pool: TaskPoolClient,
        pusher: UpstreamPusher,
        recorder: AssignmentRecorder,
        directory: Arc<dyn Database>,
    ) -> Self {
        Self {
            pool,
            pusher,
            recorder,
            directory,
            runs: KeyedLocks::new(),
        }
    }

    /// Run one allocation and fold the outcome into a report.
    pub async fn allocate(&self, request: &AssignmentRequest) -> AllocationReport {
        match self.run(request).await {
            Ok(results) => AllocationReport {
                error: false,
                message: SUCCESS_MESSAGE.to_string(),
                results,
            },
            Err(AllocationError::PoolUnavailable(e)) => {
                error!(project_id = request.project_id, language = %request.language, error = %e, "Task pool unavailable");
                AllocationReport::failed(POOL_FAILURE_MESSAGE)
            }
            Err(e) => {
                warn!(project_id = request.project_id, language = %request.language, error = %e, "Allocation rejected");
                AllocationReport::failed(e.to_string())
            }
        }
    }

    /// The allocation itself. Errors here have no side effects.
    pub async fn run(&self, request: &AssignmentRequest) -> Result<Vec<UserResult>, AllocationError> {
        let _run = self.runs.lock(request.project_id).await;
        let run_id = Uuid::new_v4();
        let project_id = request.project_id;
        let language = request.language.as_str();

        let requested = request.total_requested();
        let pool = self
            .pool
            .get_pool(project_id, language)
            .await
            .map_err(AllocationError::PoolUnavailable)?;

        if requested > pool.total_available {
            return Err(AllocationError::CapacityExceeded {
                requested,
                available: pool.total_available,
            });
        }

        let developers: HashMap<String, DeveloperRecord> = self
            .directory
            .list_developers()
            .await
            .map_err(AllocationError::Directory)?
            .into_iter()
            .map(|d| (d.user_email.clone(), d))
            .collect();

        info!(
            %run_id,
            project_id,
            language,
            requested,
            available = pool.total_available,
            users = request.per_user_counts.len(),
            "Starting allocation"
        );

        let mut cursor = PoolCursor::new(pool.task_ids);
        let mut results = Vec::with_capacity(request.per_user_counts.len());

        for (email, count) in &request.per_user_counts {
            let Some(developer) = developers.get(email) else {
                warn!(user = %email, project_id, "User not present in developer directory, skipping");
                results.push(UserResult::new(email, *count, UserStatus::UserNotFound));
                continue;
            };

            let result = if *count == 0 {
                self.record_zero(run_id, developer, language, project_id).await
            } else {
                self.assign_batch(run_id, &mut cursor, developer, *count, language, project_id)
                    .await
            };
            results.push(result);
        }

        info!(
            %run_id,
            project_id,
            language,
            assigned = results.iter().filter(|r| r.status == UserStatus::Assigned).count(),
            failed = results
                .iter()
                .filter(|r| matches!(r.status, UserStatus::PushFailed | UserStatus::RecordFailed))
                .count(),
            "Allocation finished"
        );
        Ok(results)
    }

    async fn record_zero(
        &self,
        run_id: Uuid,
        developer: &DeveloperRecord,
        language: &str,
        project_id: i64,
    ) -> UserResult {
        let email = developer.user_email.as_str();
        match self.recorder.record(run_id, 0, developer, &[], language, project_id).await {
            Ok(_) => UserResult::new(email, 0, UserStatus::ZeroRecorded),
            Err(e) => {
                error!(user = %email, project_id, error = %e, "Failed to record zero assignment");
                UserResult::new(email, 0, UserStatus::RecordFailed).with_detail(e.to_string())
            }
        }
    }

    async fn assign_batch(
        &self,
        run_id: Uuid,
        cursor: &mut PoolCursor,
        developer: &DeveloperRecord,
        count: u32,
        language: &str,
        project_id: i64,
    ) -> UserResult {
        let email = developer.user_email.as_str();
        let mut batch = cursor.draw(count);

        if batch.task_ids.is_empty() {
            warn!(user = %email, requested = count, "Pool exhausted before this user");
            return UserResult::new(email, count, UserStatus::PoolExhausted);
        }
        if batch.is_short() {
            warn!(
                user = %email,
                requested = count,
                drawn = batch.task_ids.len(),
                "Pool ran out mid-allocation, assigning fewer tasks"
            );
        }

        let status = self
            .pusher
            .assign(developer.user_id, &batch.task_ids, language, project_id)
            .await;

        if status != 200 {
            let failed = UserResult::new(email, count, UserStatus::PushFailed);
            let result = if (400..500).contains(&status) {
                // Released ids belong to whoever draws them next.
                cursor.release(&mut batch);
                failed.with_detail(format!(
                    "upstream rejected push with HTTP {status}; tasks returned to pool"
                ))
            } else {
                failed
                    .with_tasks(batch.task_ids.clone())
                    .with_detail(format!(
                        "upstream push failed with HTTP {status}; tasks not reassigned"
                    ))
            };
            error!(user = %email, project_id, status, state = ?batch.state(), "Task assignment push failed");
            return result;
        }
        batch.mark_pushed();

        let assigned = batch.task_ids.len() as u32;
        match self
            .recorder
            .record(run_id, assigned, developer, &batch.task_ids, language, project_id)
            .await
        {
            Ok(_) => {
                batch.mark_recorded();
                info!(user = %email, project_id, tasks = assigned, "Tasks assigned");
                UserResult::new(email, count, UserStatus::Assigned).with_tasks(batch.task_ids)
            }
            Err(e) => {
                error!(
                    user = %email,
                    project_id,
                    error = %e,
                    "Tasks assigned upstream but audit log write failed"
                );
                UserResult::new(email, count, UserStatus::RecordFailed)
                    .with_tasks(batch.task_ids)
                    .with_detail(e.to_string())
            }
        }
    }
}
