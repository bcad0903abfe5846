//! Per-job-type step functions and the registry that dispatches to them.

use std::collections::HashMap;

use crate::ddl::vars::DdlVars;
use crate::errors::{DdlError, MetaError, Result, SchemaError};
use crate::kv::StoreRef;
use crate::meta::Meta;
use crate::model::{ActionType, DatabaseInfo, Job, JobState, SchemaDiff, SchemaState, TableInfo};

/// Everything a handler may consult besides the job transaction.
pub struct JobContext<'a> {
    pub store: &'a StoreRef,
    pub vars: &'a DdlVars,
    pub worker: &'a str,
    pub txn_retry_limit: u32,
}

/// One DDL job type.
///
/// Each call advances the job by exactly one sub-state inside the caller's
/// transaction. Returning a diff asks the worker to bump the schema version;
/// the worker fills in the version number. Calls must be safe to replay: the
/// transaction they ran in may be retried after a write conflict.
pub trait JobHandler: Send + Sync {
    fn on_job(&self, ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>>;

    /// Undo whatever `on_job` applied so far. The default suits jobs that
    /// change nothing before their single committing step.
    fn on_rollback(&self, _ctx: &JobContext<'_>, _m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        job.state = JobState::RollbackDone;
        Ok(None)
    }
}

pub struct HandlerRegistry {
    handlers: HashMap<ActionType, Box<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register_handler(&mut self, tp: ActionType, handler: Box<dyn JobHandler>) {
        self.handlers.insert(tp, handler);
    }

    pub fn get(&self, tp: ActionType) -> Result<&dyn JobHandler> {
        self.handlers
            .get(&tp)
            .map(|h| h.as_ref())
            .ok_or_else(|| DdlError::Internal(format!("no handler registered for job type {}", tp)))
    }

    /// A registry with a handler for every job type.
    pub fn with_standard_handlers() -> Self {
        use crate::ddl::{column, index, policy, schema, table};

        let mut registry = Self::new();
        registry.register_handler(ActionType::CreateSchema, Box::new(schema::CreateSchema));
        registry.register_handler(ActionType::DropSchema, Box::new(schema::DropSchema));
        registry.register_handler(ActionType::ModifySchemaCharsetAndCollate, Box::new(schema::ModifySchemaCharset));
        registry.register_handler(ActionType::ModifySchemaDefaultPlacement, Box::new(schema::ModifySchemaPlacement));

        registry.register_handler(ActionType::CreateTable, Box::new(table::CreateTable));
        registry.register_handler(ActionType::CreateSequence, Box::new(table::CreateTable));
        registry.register_handler(ActionType::CreateView, Box::new(table::CreateView));
        registry.register_handler(ActionType::DropTable, Box::new(table::DropTableOrView));
        registry.register_handler(ActionType::DropView, Box::new(table::DropTableOrView));
        registry.register_handler(ActionType::DropSequence, Box::new(table::DropTableOrView));
        registry.register_handler(ActionType::TruncateTable, Box::new(table::TruncateTable));
        registry.register_handler(ActionType::RenameTable, Box::new(table::RenameTables));
        registry.register_handler(ActionType::RenameTables, Box::new(table::RenameTables));
        registry.register_handler(ActionType::RebaseAutoId, Box::new(table::RebaseAutoId));
        registry.register_handler(ActionType::RebaseAutoRandomBase, Box::new(table::RebaseAutoId));
        registry.register_handler(ActionType::ShardRowId, Box::new(table::ShardRowId));
        registry.register_handler(ActionType::ModifyTableAutoIdCache, Box::new(table::ModifyAutoIdCache));
        registry.register_handler(ActionType::AlterTablePlacement, Box::new(table::AlterTablePlacement));

        registry.register_handler(ActionType::AddColumns, Box::new(column::AddColumns));
        registry.register_handler(ActionType::DropColumn, Box::new(column::DropColumn));
        registry.register_handler(ActionType::ModifyColumn, Box::new(column::ModifyColumn));
        registry.register_handler(ActionType::SetDefaultValue, Box::new(column::SetDefaultValue));

        registry.register_handler(ActionType::AddIndex, Box::new(index::AddIndex));
        registry.register_handler(ActionType::DropIndex, Box::new(index::DropIndex));

        registry.register_handler(ActionType::CreatePlacementPolicy, Box::new(policy::CreatePolicy));
        registry.register_handler(ActionType::AlterPlacementPolicy, Box::new(policy::AlterPolicy));
        registry.register_handler(ActionType::DropPlacementPolicy, Box::new(policy::DropPolicy));
        registry
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_standard_handlers()
    }
}

pub(crate) fn unexpected_args(job: &Job) -> DdlError {
    DdlError::Internal(format!("job {} carries arguments for another type: {:?}", job.id, job.args))
}

/// Diff announcing that the job's own objects changed.
pub(crate) fn version_diff(job: &Job) -> Option<SchemaDiff> {
    Some(SchemaDiff::for_job(job, 0))
}

pub(crate) fn get_db_info(m: &mut Meta<'_>, job: &Job) -> Result<DatabaseInfo> {
    m.get_database(job.schema_id)?.ok_or_else(|| {
        SchemaError::DatabaseNotExists {
            name: job.schema_name.clone(),
        }
        .into()
    })
}

/// The job's table, in whatever state it currently is.
pub(crate) fn get_table_info(m: &mut Meta<'_>, job: &Job) -> Result<TableInfo> {
    get_db_info(m, job)?;
    m.get_table(job.schema_id, job.table_id)?.ok_or_else(|| {
        if job.table_name.is_empty() {
            MetaError::TableNotExists {
                db_id: job.schema_id,
                table_id: job.table_id,
            }
            .into()
        } else {
            SchemaError::TableNotExists {
                schema: job.schema_name.clone(),
                table: job.table_name.clone(),
            }
            .into()
        }
    })
}

pub(crate) fn finish_job(job: &mut Job, schema_state: SchemaState) {
    job.schema_state = schema_state;
    job.state = JobState::Done;
}
