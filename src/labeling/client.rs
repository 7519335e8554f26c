//! reqwest-backed labeling service client.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use super::{AssigneePush, FilterSet, LabelingService, TaskPage, View};
use crate::config::LabelingConfig;
use crate::error::LabelingError;
use crate::model::TaskId;

/// HTTP client for the labeling service API.
pub struct HttpLabelingClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: std::time::Duration,
    push_timeout: std::time::Duration,
}

impl HttpLabelingClient {
    /// Build a client with the static token installed as a default header.
    pub fn new(config: &LabelingConfig) -> Result<Self, LabelingError> {
        let mut auth = HeaderValue::from_str(&format!("Token {}", config.token.expose_secret()))
            .map_err(|e| LabelingError::Transport {
                endpoint: config.base_url.clone(),
                reason: format!("invalid API token: {e}"),
            })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| LabelingError::Transport {
                endpoint: config.base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            request_timeout: config.request_timeout,
            push_timeout: config.push_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn transport(endpoint: &str, e: reqwest::Error) -> LabelingError {
    LabelingError::Transport {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    }
}

/// `GET /tasks` response; extra fields are ignored.
#[derive(Deserialize)]
struct TaskListResponse {
    total: u64,
    #[serde(default)]
    tasks: Vec<TaskSummary>,
}

#[derive(Deserialize)]
struct TaskSummary {
    id: TaskId,
}

#[async_trait]
impl LabelingService for HttpLabelingClient {
    async fn list_views(&self, project_id: i64) -> Result<Vec<View>, LabelingError> {
        let endpoint = "GET /views";
        let resp = self
            .client
            .get(self.url("/views"))
            .query(&[("project", project_id)])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| transport(endpoint, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LabelingError::Status {
                endpoint: endpoint.into(),
                status: status.as_u16(),
            });
        }

        resp.json::<Vec<View>>()
            .await
            .map_err(|e| LabelingError::InvalidResponse {
                endpoint: endpoint.into(),
                reason: e.to_string(),
            })
    }

    async fn update_view_filter(
        &self,
        view_id: i64,
        project_id: i64,
        filters: &FilterSet,
    ) -> Result<(), LabelingError> {
        let endpoint = "PUT /views/{id}";
        let resp = self
            .client
            .put(self.url(&format!("/views/{view_id}")))
            .query(&[("project", project_id)])
            .json(&filters.view_body(project_id))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| transport(endpoint, e))?;

        let status = resp.status().as_u16();
        debug!(view_id, project_id, status, "View filter update");
        if status == 200 {
            Ok(())
        } else {
            Err(LabelingError::Status {
                endpoint: endpoint.into(),
                status,
            })
        }
    }

    async fn list_tasks(
        &self,
        view_id: i64,
        project_id: i64,
        page_size: u32,
    ) -> Result<TaskPage, LabelingError> {
        let endpoint = "GET /tasks";
        let resp = self
            .client
            .get(self.url("/tasks"))
            .query(&[
                ("view", view_id.to_string()),
                ("project", project_id.to_string()),
                ("page_size", page_size.to_string()),
            ])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| transport(endpoint, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LabelingError::Status {
                endpoint: endpoint.into(),
                status: status.as_u16(),
            });
        }

        let body: TaskListResponse =
            resp.json().await.map_err(|e| LabelingError::InvalidResponse {
                endpoint: endpoint.into(),
                reason: e.to_string(),
            })?;

        Ok(TaskPage {
            total: body.total,
            ids: body.tasks.into_iter().map(|t| t.id).collect(),
        })
    }

    async fn assign_tasks(
        &self,
        project_id: i64,
        push: &AssigneePush,
    ) -> Result<u16, LabelingError> {
        let resp = self
            .client
            .post(self.url(&format!("/projects/{project_id}/tasks/assignees")))
            .json(push)
            .timeout(self.push_timeout)
            .send()
            .await
            .map_err(|e| transport("POST /projects/{id}/tasks/assignees", e))?;
        Ok(resp.status().as_u16())
    }
}
