//! Online, asynchronous DDL for a MySQL-compatible store.
//!
//! Schema changes are queued as jobs in a transactional metadata store and
//! advanced by background workers through intermediate schema states, so
//! that sessions reading two adjacent schema versions never corrupt data.
//! Each published version carries a diff from which readers build the next
//! immutable [`InfoSchema`].

pub mod autoid;
pub mod charset;
pub mod cli;
pub mod config;
pub mod ddl;
pub mod domain;
pub mod error_utils;
pub mod errors;
pub mod infoschema;
pub mod job_monitor;
pub mod kv;
pub mod logging;
pub mod meta;
pub mod model;
pub mod placement;
pub mod retry;
pub mod session;
pub mod table;
pub mod view;

pub use config::{AppConfig, ConfigBuilder, LoggingConfig};
pub use ddl::stmt::{
    AlterDatabaseOption, AlterTableSpec, ColumnDef, CreateDatabaseStmt, CreatePolicyStmt, CreateSequenceStmt,
    CreateTableStmt, CreateViewStmt, DropKind, IndexDef, IndexPart, TableName, TableOptions,
};
pub use ddl::{Ddl, DdlVars, ExecContext};
pub use domain::Domain;
pub use errors::{DdlError, Result, SqlWarning};
pub use infoschema::{InfoSchema, TableHandle};
pub use job_monitor::{JobMonitor, JobStatusInfo};
pub use kv::{MemStore, StoreRef};
pub use logging::{LogConfig, init_logging, init_logging_from_env};
pub use session::Session;

// Re-export retry types for convenience
pub use retry::{RetryConfig, retry_with_backoff};

// Re-export error utility types
pub use error_utils::{RecoveryStrategy, classify_error, get_recovery_strategy};
