//! Database-level jobs.

use tracing::info;

use crate::ddl::handler::{JobContext, JobHandler, finish_job, get_db_info, unexpected_args, version_diff};
use crate::errors::{PlacementError, Result, SchemaError};
use crate::meta::Meta;
use crate::model::{Job, JobArgs, PolicyRefInfo, SchemaDiff, SchemaState};
use crate::table::drop_table_data;

/// The referenced policy must still exist when the job commits.
pub(crate) fn check_policy_ref(m: &mut Meta<'_>, policy_ref: Option<&PolicyRefInfo>) -> Result<()> {
    if let Some(r) = policy_ref {
        if m.get_policy(r.id)?.is_none() {
            return Err(PlacementError::PolicyNotExists(r.name.o.clone()).into());
        }
    }
    Ok(())
}

pub struct CreateSchema;

impl JobHandler for CreateSchema {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::CreateSchema { db } = &job.args else {
            return Err(unexpected_args(job));
        };
        let mut db = db.clone();
        check_policy_ref(m, db.placement_policy_ref.as_ref())?;
        db.id = job.schema_id;
        db.state = SchemaState::Public;
        m.create_database(&db)?;
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}

/// Public -> write only -> delete only -> gone. Tables and their data go
/// with the last step.
pub struct DropSchema;

impl JobHandler for DropSchema {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let mut db = m.get_database(job.schema_id)?.ok_or_else(|| SchemaError::DatabaseDropNotExists {
            name: job.schema_name.clone(),
        })?;
        match db.state {
            SchemaState::Public => {
                db.state = SchemaState::WriteOnly;
                m.update_database(&db)?;
                job.schema_state = SchemaState::WriteOnly;
            }
            SchemaState::WriteOnly => {
                db.state = SchemaState::DeleteOnly;
                m.update_database(&db)?;
                job.schema_state = SchemaState::DeleteOnly;
            }
            _ => {
                let tables = m.drop_database(db.id)?;
                let mut removed = 0;
                for table in &tables {
                    removed += drop_table_data(m.txn(), table.id);
                }
                info!(job_id = job.id, schema_id = db.id, tables = tables.len(), keys = removed, "database dropped");
                finish_job(job, SchemaState::None);
            }
        }
        Ok(version_diff(job))
    }
}

pub struct ModifySchemaCharset;

impl JobHandler for ModifySchemaCharset {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::ModifySchemaCharset { charset, collate } = &job.args else {
            return Err(unexpected_args(job));
        };
        let mut db = get_db_info(m, job)?;
        db.charset = charset.clone();
        db.collate = collate.clone();
        m.update_database(&db)?;
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}

pub struct ModifySchemaPlacement;

impl JobHandler for ModifySchemaPlacement {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::ModifySchemaPlacement { policy_ref } = &job.args else {
            return Err(unexpected_args(job));
        };
        let policy_ref = policy_ref.clone();
        check_policy_ref(m, policy_ref.as_ref())?;
        let mut db = get_db_info(m, job)?;
        db.placement_policy_ref = policy_ref;
        m.update_database(&db)?;
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}
