//! Axum routes for triggering allocations, reading the audit log and
//! maintaining the developer directory.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::allocator::{AssignTasksBody, AssignmentAllocator, AssignmentRequest};
use crate::model::DeveloperRecord;
use crate::store::{DEVELOPER_ROLE, Database};

/// Role allowed to trigger allocations.
pub const ADMIN_ROLE: &str = "Admin";

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub allocator: Arc<AssignmentAllocator>,
    pub db: Arc<dyn Database>,
}

/// Build the Axum router.
pub fn routes(allocator: Arc<AssignmentAllocator>, db: Arc<dyn Database>) -> Router {
    let state = AppState { allocator, db };

    Router::new()
        .route("/health", get(health))
        .route("/assignTasks", post(assign_tasks))
        .route("/logs", get(list_logs))
        .route("/developers", get(list_developers))
        .route("/developers/{user_id}", put(upsert_developer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({"error": true, "message": message.into()})),
    )
        .into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "task-allocator"
    }))
}

// ── Assignment ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProjectQuery {
    project_id: Option<i64>,
}

async fn assign_tasks(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
    Json(body): Json<AssignTasksBody>,
) -> Response {
    if body.role.as_deref() != Some(ADMIN_ROLE) {
        warn!(role = ?body.role, "Assignment attempted without admin role");
        return error_response(StatusCode::FORBIDDEN, "Only admins can assign tasks.");
    }

    let Some(project_id) = query.project_id else {
        return error_response(StatusCode::BAD_REQUEST, "project_id is required");
    };

    let request = match AssignmentRequest::from_data(project_id, &body.data) {
        Ok(r) => r,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    info!(
        project_id,
        language = %request.language,
        users = request.per_user_counts.len(),
        "Assignment requested"
    );
    let report = state.allocator.allocate(&request).await;
    (StatusCode::OK, Json(report)).into_response()
}

// ── Audit log ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LogsQuery {
    project_id: Option<i64>,
    limit: Option<usize>,
}

async fn list_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    match state.db.list_assignments(query.project_id, limit).await {
        Ok(logs) => Json(logs).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to list assignment logs");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load logs")
        }
    }
}

// ── Developer directory ─────────────────────────────────────────────────

async fn list_developers(State(state): State<AppState>) -> Response {
    match state.db.list_developers().await {
        Ok(devs) => Json(devs).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to list developers");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load developers")
        }
    }
}

#[derive(Deserialize)]
struct DeveloperBody {
    user_email: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    skillsets: BTreeSet<String>,
}

async fn upsert_developer(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<DeveloperBody>,
) -> Response {
    let user_email = body.user_email.trim();
    if user_email.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "user_email is required");
    }

    let developer = DeveloperRecord {
        user_id,
        user_email: user_email.to_string(),
        location: body.location,
        skillsets: body.skillsets,
    };
    let role = body.role.as_deref().unwrap_or(DEVELOPER_ROLE);

    match state.db.upsert_developer(&developer, role).await {
        Ok(()) => {
            info!(user_id, role, "Directory entry saved");
            Json(developer).into_response()
        }
        Err(e) => {
            warn!(user_id, error = %e, "Failed to save directory entry");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save developer")
        }
    }
}
