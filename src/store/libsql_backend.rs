//! libSQL implementation of [`Database`].
//!
//! Supports local file and in-memory databases.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::model::{AssignmentOutcome, DeveloperRecord, TaskId, WorkItem};
use crate::store::migrations;
use crate::store::traits::{DEVELOPER_ROLE, Database, StoredAssignment};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// Writes are serialized so a transaction never picks up another task's
/// statements on the shared connection.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn encode_task_ids(ids: &[TaskId]) -> Result<String, DatabaseError> {
    serde_json::to_string(ids).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn query_err(op: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

const DEVELOPER_COLUMNS: &str = "user_id, user_email, location, skillsets";

const ASSIGNMENT_COLUMNS: &str =
    "id, timestamp, total_task_assign, assign_id, user_id, tasks, language, project_id";

const WORK_ITEM_COLUMNS: &str = "task_id, user_email, user_id, status, language, created_at, updated_at, completed_at, project_id, batch_id, total_annotations, rev_id, comments";

fn row_to_developer(row: &libsql::Row) -> Result<DeveloperRecord, DatabaseError> {
    let user_id: i64 = row.get(0).map_err(query_err("developer.user_id"))?;
    let user_email: String = row.get(1).map_err(query_err("developer.user_email"))?;
    let location: Option<String> = row.get::<String>(2).ok();
    let skillsets_str: String = row.get(3).unwrap_or_else(|_| "[]".to_string());
    let skillsets: BTreeSet<String> = serde_json::from_str(&skillsets_str).unwrap_or_default();

    Ok(DeveloperRecord {
        user_id,
        user_email,
        location,
        skillsets,
    })
}

fn row_to_assignment(row: &libsql::Row) -> Result<StoredAssignment, DatabaseError> {
    let id: i64 = row.get(0).map_err(query_err("assignment.id"))?;
    let timestamp: String = row.get(1).map_err(query_err("assignment.timestamp"))?;
    let count: i64 = row.get(2).map_err(query_err("assignment.total_task_assign"))?;
    let user_email: String = row.get(3).map_err(query_err("assignment.assign_id"))?;
    let user_id: i64 = row.get(4).map_err(query_err("assignment.user_id"))?;
    let tasks: Option<Vec<TaskId>> = match row.get::<String>(5).ok() {
        Some(s) => Some(
            serde_json::from_str(&s).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        ),
        None => None,
    };
    let language: String = row.get(6).map_err(query_err("assignment.language"))?;
    let project_id: i64 = row.get(7).map_err(query_err("assignment.project_id"))?;

    Ok(StoredAssignment {
        id,
        outcome: AssignmentOutcome {
            user_email,
            user_id,
            assigned_count: u32::try_from(count).unwrap_or_default(),
            task_ids: tasks,
            language,
            project_id,
            timestamp: parse_datetime(&timestamp),
        },
    })
}

fn row_to_work_item(row: &libsql::Row) -> Result<WorkItem, DatabaseError> {
    let status_str: String = row.get(3).map_err(query_err("work_item.status"))?;
    let created: String = row.get(5).map_err(query_err("work_item.created_at"))?;
    let updated: String = row.get(6).map_err(query_err("work_item.updated_at"))?;

    Ok(WorkItem {
        task_id: TaskId(row.get(0).map_err(query_err("work_item.task_id"))?),
        user_email: row.get(1).map_err(query_err("work_item.user_email"))?,
        user_id: row.get(2).map_err(query_err("work_item.user_id"))?,
        status: status_str.parse().map_err(DatabaseError::Serialization)?,
        language: row.get(4).map_err(query_err("work_item.language"))?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
        completed_at: row.get::<String>(7).ok().map(|s| parse_datetime(&s)),
        project_id: row.get(8).map_err(query_err("work_item.project_id"))?,
        batch_id: row.get::<String>(9).ok(),
        total_annotations: row.get(10).unwrap_or(0),
        rev_id: row.get::<i64>(11).ok(),
        comments: row.get::<String>(12).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── User directory ──────────────────────────────────────────────

    async fn upsert_developer(
        &self,
        developer: &DeveloperRecord,
        role: &str,
    ) -> Result<(), DatabaseError> {
        let skillsets = serde_json::to_string(&developer.skillsets)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let _write = self.write_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO developers (user_id, user_email, role, location, skillsets, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)
                 ON CONFLICT(user_id) DO UPDATE SET
                    user_email = excluded.user_email,
                    role = excluded.role,
                    location = excluded.location,
                    skillsets = excluded.skillsets,
                    active = 1",
                params![
                    developer.user_id,
                    developer.user_email.as_str(),
                    role,
                    developer.location.as_deref(),
                    skillsets,
                ],
            )
            .await
            .map_err(query_err("upsert_developer"))?;

        debug!(user_id = developer.user_id, role, "Developer upserted");
        Ok(())
    }

    async fn list_developers(&self) -> Result<Vec<DeveloperRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DEVELOPER_COLUMNS} FROM developers WHERE role = ?1 AND active = 1 ORDER BY user_id"
                ),
                params![DEVELOPER_ROLE],
            )
            .await
            .map_err(query_err("list_developers"))?;

        let mut developers = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_developers"))? {
            developers.push(row_to_developer(&row)?);
        }
        Ok(developers)
    }

    // ── Assignment log ──────────────────────────────────────────────

    async fn append_assignment(
        &self,
        outcome: &AssignmentOutcome,
        work_items: &[WorkItem],
    ) -> Result<i64, DatabaseError> {
        let tasks_json = outcome
            .task_ids
            .as_deref()
            .map(encode_task_ids)
            .transpose()?;

        let _write = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(query_err("append_assignment begin"))?;

        tx.execute(
            "INSERT INTO assignment_logs (timestamp, total_task_assign, assign_id, user_id, tasks, language, project_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                outcome.timestamp.to_rfc3339(),
                i64::from(outcome.assigned_count),
                outcome.user_email.as_str(),
                outcome.user_id,
                tasks_json,
                outcome.language.as_str(),
                outcome.project_id,
            ],
        )
        .await
        .map_err(query_err("append_assignment log"))?;
        let log_id = tx.last_insert_rowid();

        for item in work_items {
            tx.execute(
                &format!(
                    "INSERT INTO work_items ({WORK_ITEM_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    item.task_id.0,
                    item.user_email.as_str(),
                    item.user_id,
                    item.status.as_str(),
                    item.language.as_str(),
                    item.created_at.to_rfc3339(),
                    item.updated_at.to_rfc3339(),
                    item.completed_at.map(|d| d.to_rfc3339()),
                    item.project_id,
                    item.batch_id.as_deref(),
                    item.total_annotations,
                    item.rev_id,
                    item.comments.as_deref(),
                ],
            )
            .await
            .map_err(query_err("append_assignment work_item"))?;
        }

        tx.commit()
            .await
            .map_err(query_err("append_assignment commit"))?;

        debug!(
            log_id,
            user = %outcome.user_email,
            count = outcome.assigned_count,
            work_items = work_items.len(),
            "Assignment appended"
        );
        Ok(log_id)
    }

    async fn list_assignments(
        &self,
        project_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredAssignment>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = match project_id {
            Some(pid) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {ASSIGNMENT_COLUMNS} FROM assignment_logs WHERE project_id = ?1 ORDER BY id DESC LIMIT ?2"
                    ),
                    params![pid, limit],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {ASSIGNMENT_COLUMNS} FROM assignment_logs ORDER BY id DESC LIMIT ?1"
                    ),
                    params![limit],
                )
                .await,
        }
        .map_err(query_err("list_assignments"))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_assignments"))? {
            out.push(row_to_assignment(&row)?);
        }
        Ok(out)
    }

    // ── Work items ──────────────────────────────────────────────────

    async fn list_work_items(&self, project_id: i64) -> Result<Vec<WorkItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE project_id = ?1 ORDER BY id ASC"
                ),
                params![project_id],
            )
            .await
            .map_err(query_err("list_work_items"))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_work_items"))? {
            out.push(row_to_work_item(&row)?);
        }
        Ok(out)
    }
}
