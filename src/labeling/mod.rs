//! Upstream labeling service: the trait the allocator depends on plus its
//! HTTP implementation.

pub mod client;
pub mod filters;

pub use client::HttpLabelingClient;
pub use filters::{AssigneePush, FilterItem, FilterSet, SelectedItems};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::LabelingError;
use crate::model::TaskId;

/// A saved data-manager view.
#[derive(Debug, Clone, Deserialize)]
pub struct View {
    pub id: i64,
    #[serde(default)]
    pub project: Option<i64>,
}

/// Result of listing tasks through a view.
#[derive(Debug, Clone)]
pub struct TaskPage {
    /// Total matching tasks as reported by upstream.
    pub total: u64,
    /// Ids on this page, in upstream order.
    pub ids: Vec<TaskId>,
}

/// Operations the allocator needs from the labeling service.
#[async_trait]
pub trait LabelingService: Send + Sync {
    /// List saved views for a project.
    async fn list_views(&self, project_id: i64) -> Result<Vec<View>, LabelingError>;

    /// Overwrite a view's filter definition.
    ///
    /// Anything other than HTTP 200 is returned as [`LabelingError::Status`].
    async fn update_view_filter(
        &self,
        view_id: i64,
        project_id: i64,
        filters: &FilterSet,
    ) -> Result<(), LabelingError>;

    /// List tasks matching a view in a single page of `page_size`.
    async fn list_tasks(
        &self,
        view_id: i64,
        project_id: i64,
        page_size: u32,
    ) -> Result<TaskPage, LabelingError>;

    /// Push an assignee mutation. Returns the raw HTTP status;
    /// `Err` only for transport failures.
    async fn assign_tasks(&self, project_id: i64, push: &AssigneePush)
    -> Result<u16, LabelingError>;
}
