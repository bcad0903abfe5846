use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the DDL engine
#[derive(Error, Debug)]
pub enum DdlError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    AutoId(#[from] AutoIdError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Table(#[from] TableError),

    /// An error recorded on a job record and handed back to the submitter.
    #[error(transparent)]
    Job(JobError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors about the existence of schema objects.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("[schema:1007]Can't create database '{name}'; database exists")]
    DatabaseExists { name: String },

    #[error("[schema:1008]Can't drop database '{name}'; database doesn't exist")]
    DatabaseDropNotExists { name: String },

    #[error("[schema:1049]Unknown database '{name}'")]
    DatabaseNotExists { name: String },

    #[error("[schema:1050]Table '{schema}.{table}' already exists")]
    TableExists { schema: String, table: String },

    #[error("[schema:1146]Table '{schema}.{table}' doesn't exist")]
    TableNotExists { schema: String, table: String },

    #[error("[schema:1051]Unknown table '{schema}.{table}'")]
    UnknownTable { schema: String, table: String },

    #[error("[schema:1060]Duplicate column name '{0}'")]
    ColumnExists(String),

    #[error("[schema:1054]Unknown column '{column}' in '{table}'")]
    ColumnNotExists { column: String, table: String },

    #[error("[schema:1061]Duplicate key name '{0}'")]
    IndexExists(String),

    #[error("[schema:1091]Can't DROP '{0}'; check that column/key exists")]
    CantDropFieldOrKey(String),
}

/// Structural problems detected before a job is queued.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("[ddl:1059]Identifier name '{0}' is too long")]
    TooLongIdent(String),

    #[error("[ddl:1253]COLLATION '{collation}' is not valid for CHARACTER SET '{charset}'")]
    CollationCharsetMismatch { collation: String, charset: String },

    #[error("[ddl:1115]Unknown character set: '{0}'")]
    UnknownCharset(String),

    #[error("[ddl:1273]Unknown collation: '{0}'")]
    UnknownCollation(String),

    #[error("[ddl:1067]Invalid default value for '{0}'")]
    InvalidDefault(String),

    #[error("[ddl:3102]Expression of generated column '{0}' contains a disallowed function.")]
    GeneratedColumnFunctionIsNotAllowed(String),

    #[error("[ddl:3109]Generated column '{0}' cannot refer to auto-increment column.")]
    GeneratedColumnRefAutoInc(String),

    #[error("[ddl:1054]Unknown column '{column}' in '{clause}'")]
    BadField { column: String, clause: String },

    #[error("[ddl:3107]Generated column can refer only to generated columns defined prior to it.")]
    GeneratedColumnNonPrior,

    #[error("[ddl:3758]Expression index '{0}' cannot refer to an auto-increment column")]
    ExpressionIndexCanNotRefer(String),

    #[error("[ddl:8200]Unsupported shard_row_id_bits for table with primary key as row id")]
    UnsupportedShardRowIdBits,

    #[error("[ddl:8200]Unsupported modify column: {0}")]
    UnsupportedModifyColumn(String),

    #[error("[ddl:8200]Unsupported {0}")]
    UnsupportedDdlOperation(String),

    #[error(
        "[ddl:1353]In definition of view, derived table or common table expression, SELECT list and column names list have different column counts"
    )]
    ViewWrongList,

    #[error("[ddl:1347]'{schema}.{name}' is not {kind}")]
    WrongObject {
        schema: String,
        name: String,
        kind: String,
    },

    #[error("[ddl:1068]Multiple primary key defined")]
    MultiplePriKey,

    #[error("[ddl:1090]You can't delete all columns with ALTER TABLE; use DROP TABLE instead")]
    CantRemoveAllFields,

    #[error("[ddl:1105]Drop tidb system table '{schema}.{table}' is forbidden")]
    ForbiddenDropSystemTable { schema: String, table: String },

    #[error("[ddl:1105]Drop tidb system database '{0}' is forbidden")]
    ForbiddenDropSystemDatabase(String),

    #[error("[ddl:4136]Sequence '{schema}.{name}' values are conflicting")]
    SequenceInvalidData { schema: String, name: String },

    #[error("[variable:1193]Unknown system variable '{0}'")]
    UnknownSystemVariable(String),

    #[error("[variable:1232]Incorrect argument type to variable '{0}'")]
    WrongTypeForVar(String),
}

/// Allocation errors for auto-increment, auto-random and row IDs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutoIdError {
    #[error("[autoid:1467]Failed to read auto-increment value from storage engine")]
    AutoincReadFailed,

    #[error("[autoid:8228]Failed to read auto-random value from storage engine")]
    AutoRandReadFailed,

    #[error("[autoid:8216]Invalid auto random: {0}")]
    InvalidAutoRandom(String),
}

impl AutoIdError {
    pub fn rebase_not_applicable() -> Self {
        AutoIdError::InvalidAutoRandom("alter auto_random_base of a non auto_random table".to_string())
    }

    pub fn explicit_insert_disabled() -> Self {
        AutoIdError::InvalidAutoRandom(
            "Explicit insertion on auto_random column is disabled. Try to set @@allow_auto_random_explicit_insert = true."
                .to_string(),
        )
    }
}

/// Storage and transaction layer errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KvError {
    #[error("[kv:9007]Write conflict, txnStartTS={start_ts}, conflictCommitTS={conflict_ts}, key={key}")]
    WriteConflict {
        start_ts: u64,
        conflict_ts: u64,
        key: String,
    },

    #[error("[kv:1062]Duplicate entry '{entry}' for key '{key_name}'")]
    KeyExists { entry: String, key_name: String },

    #[error("[kv:8008]DDL worker {worker} lost its lease on job {job_id}")]
    LeaseLost { worker: String, job_id: i64 },
}

/// Metadata records that should exist by ID but do not, or cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetaError {
    #[error("[meta:1049]database id {0} doesn't exist")]
    DatabaseNotExists(i64),

    #[error("[meta:1146]table id {table_id} doesn't exist in database {db_id}")]
    TableNotExists { db_id: i64, table_id: i64 },

    #[error("[meta:8239]placement policy id {0} doesn't exist")]
    PolicyNotExists(i64),

    #[error("[meta:8226]corrupted meta record at '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    #[error("[schema:8238]Placement policy '{0}' already exists")]
    PolicyExists(String),

    #[error("[schema:8239]Unknown placement policy '{0}'")]
    PolicyNotExists(String),

    #[error("[ddl:8241]Placement policy '{0}' is still in use")]
    PolicyInUse(String),

    #[error("[ddl:8242]Invalid placement option: {0}")]
    InvalidOption(String),
}

/// Name resolution errors raised while pinning objects for a statement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("[planner:1046]No database selected")]
    NoDb,

    #[error("[planner:1462]`{schema}`.`{view}` contains view recursion")]
    ViewRecursive { schema: String, view: String },

    #[error(
        "[planner:1356]View '{schema}.{view}' references invalid table(s) or column(s) or function(s) or definer/invoker of view lack rights to use them"
    )]
    ViewInvalid { schema: String, view: String },

    #[error("[planner:1054]Unknown column '{0}' in 'field list'")]
    UnknownColumn(String),

    #[error("[planner:1136]Column count doesn't match value count at row {0}")]
    WrongValueCount(usize),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdminError {
    #[error("[admin:8218]DDL Job:{0} not found")]
    JobNotFound(i64),

    #[error("[admin:8212]This job:{0} is almost finished, can't be cancelled now")]
    CannotCancelJob(i64),

    #[error("[admin:8213]This job:{0} is finished, so can't be cancelled")]
    JobAlreadyFinished(i64),

    #[error("[admin:8260]Job {0} is not paused")]
    JobNotPaused(i64),

    #[error("[ddl:8214]Cancelled DDL job")]
    Cancelled,

    #[error("[ddl:8215]Timed out waiting for DDL job {0}")]
    WaitTimeout(i64),

    #[error("[ddl:8201]DDL workers are shut down")]
    Closed,

    #[error(
        "[domain:8027]Information schema is out of date: schema version {0} is no longer cached"
    )]
    InfoSchemaExpired(i64),
}

/// Row-level errors raised by the record layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("[table:1364]Field '{0}' doesn't have a default value")]
    NoDefaultForField(String),

    #[error("[table:1048]Column '{0}' cannot be null")]
    BadNull(String),

    #[error("[types:1366]Incorrect {kind} value: '{value}' for column '{column}'")]
    IncorrectValue {
        kind: String,
        value: String,
        column: String,
    },

    #[error("[types:1264]Out of range value for column '{0}'")]
    OutOfRange(String),

    #[error("[ddl:1138]Invalid use of NULL value")]
    InvalidUseOfNull,
}

/// How the worker and callers should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Validation,
    Conflict,
    ResourceExhausted,
    Transient,
    Fatal,
}

/// Serialisable error stored on a job record.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct JobError {
    pub code: u16,
    pub message: String,
    pub category: ErrorCategory,
}

impl From<&DdlError> for JobError {
    fn from(err: &DdlError) -> Self {
        match err {
            DdlError::Job(e) => e.clone(),
            other => JobError {
                code: other.code(),
                message: other.to_string(),
                category: crate::error_utils::classify_error(other),
            },
        }
    }
}

impl DdlError {
    /// MySQL-compatible error code, 1105 for errors without a dedicated one.
    pub fn code(&self) -> u16 {
        match self {
            DdlError::Schema(e) => match e {
                SchemaError::DatabaseExists { .. } => 1007,
                SchemaError::DatabaseDropNotExists { .. } => 1008,
                SchemaError::DatabaseNotExists { .. } => 1049,
                SchemaError::TableExists { .. } => 1050,
                SchemaError::TableNotExists { .. } => 1146,
                SchemaError::UnknownTable { .. } => 1051,
                SchemaError::ColumnExists(_) => 1060,
                SchemaError::ColumnNotExists { .. } => 1054,
                SchemaError::IndexExists(_) => 1061,
                SchemaError::CantDropFieldOrKey(_) => 1091,
            },
            DdlError::Validation(e) => match e {
                ValidationError::TooLongIdent(_) => 1059,
                ValidationError::CollationCharsetMismatch { .. } => 1253,
                ValidationError::UnknownCharset(_) => 1115,
                ValidationError::UnknownCollation(_) => 1273,
                ValidationError::InvalidDefault(_) => 1067,
                ValidationError::GeneratedColumnFunctionIsNotAllowed(_) => 3102,
                ValidationError::GeneratedColumnRefAutoInc(_) => 3109,
                ValidationError::BadField { .. } => 1054,
                ValidationError::GeneratedColumnNonPrior => 3107,
                ValidationError::ExpressionIndexCanNotRefer(_) => 3758,
                ValidationError::UnsupportedShardRowIdBits
                | ValidationError::UnsupportedModifyColumn(_)
                | ValidationError::UnsupportedDdlOperation(_) => 8200,
                ValidationError::ViewWrongList => 1353,
                ValidationError::WrongObject { .. } => 1347,
                ValidationError::MultiplePriKey => 1068,
                ValidationError::CantRemoveAllFields => 1090,
                ValidationError::ForbiddenDropSystemTable { .. }
                | ValidationError::ForbiddenDropSystemDatabase(_) => 1105,
                ValidationError::SequenceInvalidData { .. } => 4136,
                ValidationError::UnknownSystemVariable(_) => 1193,
                ValidationError::WrongTypeForVar(_) => 1232,
            },
            DdlError::AutoId(e) => match e {
                AutoIdError::AutoincReadFailed => 1467,
                AutoIdError::AutoRandReadFailed => 8228,
                AutoIdError::InvalidAutoRandom(_) => 8216,
            },
            DdlError::Kv(e) => match e {
                KvError::WriteConflict { .. } => 9007,
                KvError::KeyExists { .. } => 1062,
                KvError::LeaseLost { .. } => 8008,
            },
            DdlError::Meta(e) => match e {
                MetaError::DatabaseNotExists(_) => 1049,
                MetaError::TableNotExists { .. } => 1146,
                MetaError::PolicyNotExists(_) => 8239,
                MetaError::Corrupt { .. } => 8226,
            },
            DdlError::Placement(e) => match e {
                PlacementError::PolicyExists(_) => 8238,
                PlacementError::PolicyNotExists(_) => 8239,
                PlacementError::PolicyInUse(_) => 8241,
                PlacementError::InvalidOption(_) => 8242,
            },
            DdlError::Planner(e) => match e {
                PlannerError::NoDb => 1046,
                PlannerError::ViewRecursive { .. } => 1462,
                PlannerError::ViewInvalid { .. } => 1356,
                PlannerError::UnknownColumn(_) => 1054,
                PlannerError::WrongValueCount(_) => 1136,
            },
            DdlError::Admin(e) => match e {
                AdminError::JobNotFound(_) => 8218,
                AdminError::CannotCancelJob(_) => 8212,
                AdminError::JobAlreadyFinished(_) => 8213,
                AdminError::JobNotPaused(_) => 8260,
                AdminError::Cancelled => 8214,
                AdminError::WaitTimeout(_) => 8215,
                AdminError::Closed => 8201,
                AdminError::InfoSchemaExpired(_) => 8027,
            },
            DdlError::Table(e) => match e {
                TableError::NoDefaultForField(_) => 1364,
                TableError::BadNull(_) => 1048,
                TableError::IncorrectValue { .. } => 1366,
                TableError::OutOfRange(_) => 1264,
                TableError::InvalidUseOfNull => 1138,
            },
            DdlError::Job(e) => e.code,
            DdlError::Configuration(_)
            | DdlError::Logging(_)
            | DdlError::Io(_)
            | DdlError::Serialization(_)
            | DdlError::Internal(_) => 1105,
        }
    }
}

pub type Result<T> = std::result::Result<T, DdlError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningLevel {
    Note,
    Warning,
}

/// A statement warning, as listed by SHOW WARNINGS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlWarning {
    pub level: WarningLevel,
    pub code: u16,
    pub message: String,
}

impl SqlWarning {
    /// Downgrade an error to a note, e.g. for `IF EXISTS` / `IF NOT EXISTS`.
    pub fn note(err: &DdlError) -> Self {
        Self {
            level: WarningLevel::Note,
            code: err.code(),
            message: strip_class_prefix(&err.to_string()).to_string(),
        }
    }

    pub fn warning(code: u16, message: impl Into<String>) -> Self {
        Self {
            level: WarningLevel::Warning,
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SqlWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            WarningLevel::Note => "Note",
            WarningLevel::Warning => "Warning",
        };
        write!(f, "{} {} {}", level, self.code, self.message)
    }
}

/// `[schema:1051]Unknown table` -> `Unknown table`.
fn strip_class_prefix(text: &str) -> &str {
    if text.starts_with('[') {
        if let Some(end) = text.find(']') {
            return &text[end + 1..];
        }
    }
    text
}

impl From<String> for DdlError {
    fn from(err: String) -> Self {
        DdlError::Internal(err)
    }
}

impl From<&str> for DdlError {
    fn from(err: &str) -> Self {
        DdlError::Internal(err.to_string())
    }
}

impl From<JobError> for DdlError {
    fn from(err: JobError) -> Self {
        DdlError::Job(err)
    }
}

impl From<config::ConfigError> for DdlError {
    fn from(err: config::ConfigError) -> Self {
        DdlError::Configuration(err.to_string())
    }
}

impl From<toml::de::Error> for DdlError {
    fn from(err: toml::de::Error) -> Self {
        DdlError::Configuration(err.to_string())
    }
}

impl From<toml::ser::Error> for DdlError {
    fn from(err: toml::ser::Error) -> Self {
        DdlError::Configuration(err.to_string())
    }
}
