//! Placement policy jobs. Policy jobs carry the policy ID in `schema_id`.

use crate::ddl::handler::{JobContext, JobHandler, finish_job, unexpected_args, version_diff};
use crate::errors::{PlacementError, Result};
use crate::meta::Meta;
use crate::model::{Job, JobArgs, PolicyInfo, SchemaDiff, SchemaState};
use crate::placement::check_policy_not_in_use_from_meta;

fn get_policy_info(m: &mut Meta<'_>, job: &Job) -> Result<PolicyInfo> {
    m.get_policy(job.schema_id)?
        .ok_or_else(|| PlacementError::PolicyNotExists(job.schema_name.clone()).into())
}

pub struct CreatePolicy;

impl JobHandler for CreatePolicy {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::CreatePolicy { policy, or_replace } = &job.args else {
            return Err(unexpected_args(job));
        };
        let (mut policy, or_replace) = (policy.clone(), *or_replace);
        policy.state = SchemaState::Public;
        match m.get_policy_by_name(&policy.name.l)? {
            Some(existing) if or_replace => {
                policy.id = existing.id;
                job.schema_id = existing.id;
                m.update_policy(&policy)?;
            }
            Some(_) => return Err(PlacementError::PolicyExists(policy.name.o).into()),
            None => {
                policy.id = job.schema_id;
                m.create_policy(&policy)?;
            }
        }
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}

pub struct AlterPolicy;

impl JobHandler for AlterPolicy {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::AlterPolicy { policy } = &job.args else {
            return Err(unexpected_args(job));
        };
        let settings = policy.settings.clone();
        let mut current = get_policy_info(m, job)?;
        current.settings = settings;
        m.update_policy(&current)?;
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}

/// The in-use check is repeated here so a reference created after the
/// statement was submitted still blocks the drop.
pub struct DropPolicy;

impl JobHandler for DropPolicy {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let policy = get_policy_info(m, job)?;
        check_policy_not_in_use_from_meta(m, &policy)?;
        m.drop_policy(policy.id)?;
        finish_job(job, SchemaState::None);
        Ok(version_diff(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::vars::DdlVars;
    use crate::kv::{MemStore, StoreRef, run_in_new_txn};
    use crate::model::{ActionType, DatabaseInfo, PlacementSettings, PolicyRefInfo};

    fn run(store: &StoreRef, handler: &dyn JobHandler, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let vars = DdlVars::default();
        let ctx = JobContext {
            store,
            vars: &vars,
            worker: "test",
            txn_retry_limit: 3,
        };
        run_in_new_txn(store, 3, |txn| handler.on_job(&ctx, &mut Meta::new(txn), job))
    }

    fn policy(name: &str, region: &str) -> PolicyInfo {
        PolicyInfo {
            id: 0,
            name: name.into(),
            settings: PlacementSettings {
                primary_region: region.into(),
                regions: region.into(),
                ..Default::default()
            },
            state: SchemaState::None,
        }
    }

    fn create(store: &StoreRef, id: i64, p: PolicyInfo, or_replace: bool) -> Result<Option<SchemaDiff>> {
        let mut job = Job::new(
            ActionType::CreatePlacementPolicy,
            id,
            0,
            JobArgs::CreatePolicy { policy: p, or_replace },
        );
        run(store, &CreatePolicy, &mut job)
    }

    #[test]
    fn test_create_or_replace_keeps_id() {
        let store = MemStore::new_ref();
        create(&store, 5, policy("p1", "r1"), false).unwrap();
        let err = create(&store, 6, policy("p1", "r2"), false).unwrap_err();
        assert_eq!(err.code(), 8238);
        create(&store, 6, policy("p1", "r2"), true).unwrap();
        let p = run_in_new_txn(&store, 3, |txn| Meta::new(txn).get_policy_by_name("p1")).unwrap().unwrap();
        assert_eq!(p.id, 5);
        assert_eq!(p.settings.primary_region, "r2");
    }

    #[test]
    fn test_drop_policy_in_use() {
        let store = MemStore::new_ref();
        create(&store, 5, policy("p1", "r1"), false).unwrap();
        run_in_new_txn(&store, 3, |txn| {
            let mut db = DatabaseInfo::new(1, "test", "utf8mb4", "utf8mb4_bin");
            db.placement_policy_ref = Some(PolicyRefInfo { id: 5, name: "p1".into() });
            Meta::new(txn).create_database(&db)
        })
        .unwrap();
        let mut job = Job::new(ActionType::DropPlacementPolicy, 5, 0, JobArgs::None).with_names("p1", "");
        let err = run(&store, &DropPolicy, &mut job).unwrap_err();
        assert_eq!(err.to_string(), "[ddl:8241]Placement policy 'p1' is still in use");
    }
}
