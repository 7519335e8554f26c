//! Persistence for the developer directory and assignment history.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{DEVELOPER_ROLE, Database, StoredAssignment};
