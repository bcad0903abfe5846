use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::JobError;
use crate::model::{CIStr, ColumnInfo, DatabaseInfo, IndexInfo, PolicyInfo, PolicyRefInfo, SchemaState, TableInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    CreateSchema,
    DropSchema,
    ModifySchemaCharsetAndCollate,
    ModifySchemaDefaultPlacement,
    CreateTable,
    DropTable,
    TruncateTable,
    RenameTable,
    RenameTables,
    CreateView,
    DropView,
    CreateSequence,
    DropSequence,
    AddColumns,
    DropColumn,
    ModifyColumn,
    SetDefaultValue,
    AddIndex,
    DropIndex,
    RebaseAutoId,
    RebaseAutoRandomBase,
    ShardRowId,
    ModifyTableAutoIdCache,
    AlterTablePlacement,
    CreatePlacementPolicy,
    AlterPlacementPolicy,
    DropPlacementPolicy,
}

impl ActionType {
    /// Jobs that operate on a whole schema rather than one table.
    pub fn is_schema_level(self) -> bool {
        matches!(
            self,
            ActionType::CreateSchema
                | ActionType::DropSchema
                | ActionType::ModifySchemaCharsetAndCollate
                | ActionType::ModifySchemaDefaultPlacement
        )
    }

    pub fn is_policy_level(self) -> bool {
        matches!(
            self,
            ActionType::CreatePlacementPolicy
                | ActionType::AlterPlacementPolicy
                | ActionType::DropPlacementPolicy
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionType::CreateSchema => "create schema",
            ActionType::DropSchema => "drop schema",
            ActionType::ModifySchemaCharsetAndCollate => "modify schema charset and collate",
            ActionType::ModifySchemaDefaultPlacement => "modify schema default placement",
            ActionType::CreateTable => "create table",
            ActionType::DropTable => "drop table",
            ActionType::TruncateTable => "truncate table",
            ActionType::RenameTable => "rename table",
            ActionType::RenameTables => "rename tables",
            ActionType::CreateView => "create view",
            ActionType::DropView => "drop view",
            ActionType::CreateSequence => "create sequence",
            ActionType::DropSequence => "drop sequence",
            ActionType::AddColumns => "add column",
            ActionType::DropColumn => "drop column",
            ActionType::ModifyColumn => "modify column",
            ActionType::SetDefaultValue => "set default value",
            ActionType::AddIndex => "add index",
            ActionType::DropIndex => "drop index",
            ActionType::RebaseAutoId => "rebase auto_increment ID",
            ActionType::RebaseAutoRandomBase => "rebase auto_random ID",
            ActionType::ShardRowId => "shard row ID",
            ActionType::ModifyTableAutoIdCache => "modify auto id cache",
            ActionType::AlterTablePlacement => "alter table placement",
            ActionType::CreatePlacementPolicy => "create placement policy",
            ActionType::AlterPlacementPolicy => "alter placement policy",
            ActionType::DropPlacementPolicy => "drop placement policy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Queueing,
    Running,
    RollingBack,
    RollbackDone,
    Done,
    Cancelling,
    Cancelled,
    /// Failed past the point of no return; waits for an operator to resume it.
    Paused,
}

impl JobState {
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Done | JobState::RollbackDone | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queueing => "queueing",
            JobState::Running => "running",
            JobState::RollingBack => "rollingback",
            JobState::RollbackDone => "rollback done",
            JobState::Done => "done",
            JobState::Cancelling => "cancelling",
            JobState::Cancelled => "cancelled",
            JobState::Paused => "paused",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnPosition {
    None,
    First,
    After(CIStr),
}

/// One element of a (multi-)rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameEntry {
    pub table_id: i64,
    pub old_schema_id: i64,
    pub old_schema_name: CIStr,
    pub old_table_name: CIStr,
    pub new_schema_id: i64,
    pub new_table_name: CIStr,
}

/// Per-type job arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobArgs {
    None,
    CreateSchema { db: DatabaseInfo },
    ModifySchemaCharset { charset: String, collate: String },
    ModifySchemaPlacement { policy_ref: Option<PolicyRefInfo> },
    CreateTable { table: TableInfo },
    CreateView { view: TableInfo, or_replace: bool, old_view_id: i64 },
    TruncateTable { new_table_id: i64 },
    RenameTables { entries: Vec<RenameEntry> },
    AddColumns {
        columns: Vec<ColumnInfo>,
        positions: Vec<ColumnPosition>,
        if_not_exists: bool,
    },
    DropColumn { name: CIStr },
    ModifyColumn {
        column: ColumnInfo,
        old_name: CIStr,
        position: ColumnPosition,
    },
    SetDefaultValue { column: ColumnInfo },
    AddIndex {
        index: IndexInfo,
        hidden_columns: Vec<ColumnInfo>,
    },
    DropIndex { name: CIStr },
    RebaseAutoId { new_base: i64, force: bool },
    ShardRowId { bits: u64 },
    ModifyAutoIdCache { cache: i64 },
    AlterTablePlacement { policy_ref: Option<PolicyRefInfo> },
    CreatePolicy { policy: PolicyInfo, or_replace: bool },
    AlterPolicy { policy: PolicyInfo },
}

/// Worker ownership of a queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLease {
    pub worker: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryInfo {
    pub schema_version: i64,
    pub finished_ts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub tp: ActionType,
    pub schema_id: i64,
    pub table_id: i64,
    pub schema_name: String,
    pub table_name: String,
    pub args: JobArgs,
    pub state: JobState,
    pub schema_state: SchemaState,
    /// Snapshot timestamp backfill reads from.
    pub snapshot_ver: u64,
    pub error: Option<JobError>,
    pub error_count: i64,
    pub row_count: i64,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub binlog: HistoryInfo,
    pub lease: Option<JobLease>,
    /// State to return to when a paused job is resumed.
    #[serde(default)]
    pub paused_from: Option<JobState>,
}

impl Job {
    pub fn new(tp: ActionType, schema_id: i64, table_id: i64, args: JobArgs) -> Self {
        Self {
            id: 0,
            tp,
            schema_id,
            table_id,
            schema_name: String::new(),
            table_name: String::new(),
            args,
            state: JobState::Queueing,
            schema_state: SchemaState::None,
            snapshot_ver: 0,
            error: None,
            error_count: 0,
            row_count: 0,
            query: String::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            binlog: HistoryInfo::default(),
            lease: None,
            paused_from: None,
        }
    }

    pub fn with_names(mut self, schema: &str, table: &str) -> Self {
        self.schema_name = schema.to_string();
        self.table_name = table.to_string();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Whether a failure at the current sub-state can still be undone.
    pub fn is_rollbackable(&self) -> bool {
        match self.tp {
            ActionType::DropSchema
            | ActionType::DropTable
            | ActionType::DropView
            | ActionType::DropSequence
            | ActionType::DropColumn
            | ActionType::DropIndex
            | ActionType::DropPlacementPolicy => self.schema_state == SchemaState::None,
            ActionType::TruncateTable => true,
            _ => self.schema_state != SchemaState::Public,
        }
    }

    /// (schema_id, table_id) pairs this job touches; table 0 means the whole schema.
    pub fn involved_objects(&self) -> Vec<(i64, i64)> {
        let mut objects = Vec::new();
        if self.tp.is_schema_level() {
            objects.push((self.schema_id, 0));
        } else {
            objects.push((self.schema_id, self.table_id));
        }
        if let JobArgs::RenameTables { entries } = &self.args {
            for e in entries {
                objects.push((e.old_schema_id, e.table_id));
                objects.push((e.new_schema_id, e.table_id));
            }
        }
        objects
    }

    /// True when `self` must wait for the earlier job `other` to finish.
    pub fn depends_on(&self, other: &Job) -> bool {
        let mine = self.involved_objects();
        let theirs = other.involved_objects();
        mine.iter().any(|(s1, t1)| {
            theirs
                .iter()
                .any(|(s2, t2)| s1 == s2 && (t1 == t2 || *t1 == 0 || *t2 == 0))
        })
    }

    pub fn is_lease_held_by_other(&self, worker: &str, now: DateTime<Utc>) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|l| l.worker != worker && l.expires_at > now)
    }

    pub fn finish(&mut self, state: JobState, schema_version: i64) {
        self.state = state;
        self.finished_at = Some(Utc::now());
        self.binlog.schema_version = schema_version;
        self.lease = None;
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID:{}, Type:{}, State:{}, SchemaState:{}, SchemaID:{}, TableID:{}, RowCount:{}, ErrorCount:{}, SchemaVersion:{}",
            self.id,
            self.tp,
            self.state,
            self.schema_state,
            self.schema_id,
            self.table_id,
            self.row_count,
            self.error_count,
            self.binlog.schema_version
        )?;
        if let Some(ref err) = self.error {
            write!(f, ", Error:{}", err)?;
        }
        Ok(())
    }
}

/// Which objects a committed job step touched, per schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedOption {
    pub schema_id: i64,
    pub table_id: i64,
    pub old_schema_id: i64,
    pub old_table_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub version: i64,
    pub tp: ActionType,
    pub schema_id: i64,
    pub table_id: i64,
    pub old_schema_id: i64,
    pub old_table_id: i64,
    pub affected_opts: Vec<AffectedOption>,
}

impl SchemaDiff {
    pub fn for_job(job: &Job, version: i64) -> Self {
        Self {
            version,
            tp: job.tp,
            schema_id: job.schema_id,
            table_id: job.table_id,
            old_schema_id: job.schema_id,
            old_table_id: job.table_id,
            affected_opts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies() {
        let create_a = Job::new(ActionType::CreateTable, 1, 10, JobArgs::None);
        let alter_a = Job::new(ActionType::AddIndex, 1, 10, JobArgs::None);
        let alter_b = Job::new(ActionType::AddIndex, 1, 11, JobArgs::None);
        let drop_db = Job::new(ActionType::DropSchema, 1, 0, JobArgs::None);
        let other_db = Job::new(ActionType::CreateTable, 2, 20, JobArgs::None);

        assert!(alter_a.depends_on(&create_a));
        assert!(!alter_b.depends_on(&create_a));
        assert!(alter_b.depends_on(&drop_db));
        assert!(!other_db.depends_on(&drop_db));
    }

    #[test]
    fn test_rename_involves_both_schemas() {
        let job = Job::new(
            ActionType::RenameTables,
            1,
            10,
            JobArgs::RenameTables {
                entries: vec![RenameEntry {
                    table_id: 10,
                    old_schema_id: 1,
                    old_schema_name: "a".into(),
                    old_table_name: "t".into(),
                    new_schema_id: 2,
                    new_table_name: "t".into(),
                }],
            },
        );
        let create_in_target = Job::new(ActionType::DropSchema, 2, 0, JobArgs::None);
        assert!(create_in_target.depends_on(&job));
    }

    #[test]
    fn test_rollbackable_boundaries() {
        let mut job = Job::new(ActionType::DropTable, 1, 10, JobArgs::None);
        assert!(job.is_rollbackable());
        job.schema_state = SchemaState::WriteOnly;
        assert!(!job.is_rollbackable());

        let mut job = Job::new(ActionType::AddIndex, 1, 10, JobArgs::None);
        job.schema_state = SchemaState::WriteReorganization;
        assert!(job.is_rollbackable());
    }

    #[test]
    fn test_job_serializes() {
        let job = Job::new(ActionType::RebaseAutoId, 1, 2, JobArgs::RebaseAutoId { new_base: 5, force: false });
        let json = serde_json::to_vec(&job).unwrap();
        let back: Job = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.args, job.args);
        assert_eq!(back.state, JobState::Queueing);
    }
}
