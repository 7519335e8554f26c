//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS developers (
                user_id INTEGER PRIMARY KEY,
                user_email TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL DEFAULT 'Developer',
                location TEXT,
                skillsets TEXT NOT NULL DEFAULT '[]',
                active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_developers_role ON developers(role);

            CREATE TABLE IF NOT EXISTS assignment_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                total_task_assign INTEGER NOT NULL,
                assign_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                tasks TEXT,
                language TEXT NOT NULL,
                project_id INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_assignment_logs_project ON assignment_logs(project_id);

            CREATE TABLE IF NOT EXISTS work_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                user_email TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'Not Started',
                language TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                project_id INTEGER NOT NULL,
                batch_id TEXT,
                total_annotations INTEGER NOT NULL DEFAULT 0,
                rev_id INTEGER,
                comments TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_work_items_project ON work_items(project_id);
            CREATE INDEX IF NOT EXISTS idx_work_items_task ON work_items(task_id);
            CREATE INDEX IF NOT EXISTS idx_work_items_user ON work_items(user_email);
        "#,
    },
    Migration {
        version: 2,
        name: "append_only_assignment_logs",
        sql: r#"
            CREATE TRIGGER IF NOT EXISTS assignment_logs_no_update
            BEFORE UPDATE ON assignment_logs
            BEGIN
                SELECT RAISE(ABORT, 'assignment_logs is append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS assignment_logs_no_delete
            BEFORE DELETE ON assignment_logs
            BEGIN
                SELECT RAISE(ABORT, 'assignment_logs is append-only');
            END;
        "#,
    },
];

/// Create the tracking table and apply every migration newer than the
/// recorded version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
