//! Error types for the task allocator.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors talking to the upstream labeling service.
#[derive(Debug, thiserror::Error)]
pub enum LabelingError {
    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Project {project_id} has no saved views")]
    NoView { project_id: i64 },

    #[error("View filter for project {project_id} not applied after {attempts} attempts ({elapsed:?})")]
    FilterNotApplied {
        project_id: i64,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("View filter for project {project_id} aborted after {internal_errors} internal errors")]
    FilterAborted {
        project_id: i64,
        internal_errors: u32,
    },
}

/// Errors that abort a whole allocation run.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("Invalid assignment request: {0}")]
    InvalidRequest(String),

    #[error("Task pool unavailable: {0}")]
    PoolUnavailable(#[source] LabelingError),

    #[error("Requested {requested} tasks, greater than available tasks: {available}")]
    CapacityExceeded { requested: u64, available: u64 },

    #[error("Developer directory unavailable: {0}")]
    Directory(#[source] DatabaseError),
}
