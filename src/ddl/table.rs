//! Table, view and sequence jobs, including renames and the auto-ID options.

use tracing::{debug, info};

use crate::autoid::{AllocatorType, auto_random_layout};
use crate::ddl::handler::{JobContext, JobHandler, finish_job, get_db_info, get_table_info, unexpected_args, version_diff};
use crate::ddl::schema::check_policy_ref;
use crate::errors::{AutoIdError, MetaError, Result, SchemaError};
use crate::meta::Meta;
use crate::model::{ActionType, AffectedOption, Job, JobArgs, SchemaDiff, SchemaState, TableInfo};
use crate::table::drop_table_data;

fn check_table_policies(m: &mut Meta<'_>, table: &TableInfo) -> Result<()> {
    let refs: Vec<_> = table.policy_refs().cloned().collect();
    for r in &refs {
        check_policy_ref(m, Some(r))?;
    }
    Ok(())
}

/// Persist the initial allocator bases requested by table options.
fn init_auto_ids(m: &mut Meta<'_>, table: &TableInfo) {
    if table.auto_inc_id > 1 {
        m.set_auto_id(table.id, AllocatorType::RowId, table.auto_inc_id - 1);
    }
    if table.auto_rand_id > 1 {
        m.set_auto_id(table.id, AllocatorType::AutoRandom, table.auto_rand_id - 1);
    }
}

/// Tables and sequences become public in a single step.
pub struct CreateTable;

impl JobHandler for CreateTable {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::CreateTable { table } = &job.args else {
            return Err(unexpected_args(job));
        };
        let mut table = table.clone();
        get_db_info(m, job)?;
        check_table_policies(m, &table)?;
        table.id = job.table_id;
        table.state = SchemaState::Public;
        m.create_table(job.schema_id, &table)?;
        init_auto_ids(m, &table);
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}

pub struct CreateView;

impl JobHandler for CreateView {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::CreateView { view, or_replace, old_view_id } = &job.args else {
            return Err(unexpected_args(job));
        };
        let (mut view, or_replace, old_view_id) = (view.clone(), *or_replace, *old_view_id);
        get_db_info(m, job)?;
        view.state = SchemaState::Public;
        if or_replace && old_view_id != 0 {
            // Keep the existing ID so that references by ID stay valid.
            view.id = old_view_id;
            m.update_table(job.schema_id, &view)?;
            job.table_id = old_view_id;
        } else {
            view.id = job.table_id;
            m.create_table(job.schema_id, &view)?;
        }
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}

/// Public -> write only -> delete only -> gone, for tables, views and
/// sequences alike.
pub struct DropTableOrView;

impl JobHandler for DropTableOrView {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let mut table = get_table_info(m, job).map_err(|_| SchemaError::UnknownTable {
            schema: job.schema_name.clone(),
            table: job.table_name.clone(),
        })?;
        match table.state {
            SchemaState::Public => {
                table.state = SchemaState::WriteOnly;
                m.update_table(job.schema_id, &table)?;
                job.schema_state = SchemaState::WriteOnly;
            }
            SchemaState::WriteOnly => {
                table.state = SchemaState::DeleteOnly;
                m.update_table(job.schema_id, &table)?;
                job.schema_state = SchemaState::DeleteOnly;
            }
            _ => {
                m.drop_table(job.schema_id, table.id, true)?;
                let keys = drop_table_data(m.txn(), table.id);
                info!(job_id = job.id, table_id = table.id, keys, "table dropped");
                finish_job(job, SchemaState::None);
            }
        }
        Ok(version_diff(job))
    }
}

/// Replace the table by an empty copy under a new ID. Partitions get new IDs
/// too, and the allocators restart from the table's AUTO_INCREMENT and
/// AUTO_RANDOM_BASE options.
pub struct TruncateTable;

impl JobHandler for TruncateTable {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::TruncateTable { new_table_id } = job.args else {
            return Err(unexpected_args(job));
        };
        let old = get_table_info(m, job)?;
        m.drop_table(job.schema_id, old.id, true)?;
        let mut keys = drop_table_data(m.txn(), old.id);

        let mut table = old.clone();
        table.id = new_table_id;
        if let Some(partition) = table.partition.as_mut() {
            let ids = m.gen_global_ids(partition.definitions.len())?;
            for (def, id) in partition.definitions.iter_mut().zip(ids) {
                keys += drop_table_data(m.txn(), def.id);
                def.id = id;
            }
        }
        m.create_table(job.schema_id, &table)?;
        init_auto_ids(m, &table);
        debug!(job_id = job.id, old_table_id = old.id, new_table_id, keys, "table truncated");

        finish_job(job, SchemaState::Public);
        let mut diff = SchemaDiff::for_job(job, 0);
        diff.table_id = new_table_id;
        diff.old_table_id = old.id;
        Ok(Some(diff))
    }
}

/// Single and multi-table renames. Entries apply in order within one
/// transaction, so a swap through a temporary name works and any failure
/// leaves every table where it was.
pub struct RenameTables;

impl JobHandler for RenameTables {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::RenameTables { entries } = &job.args else {
            return Err(unexpected_args(job));
        };
        let entries = entries.clone();
        let mut opts = Vec::with_capacity(entries.len());
        for entry in &entries {
            let mut table = m.get_table(entry.old_schema_id, entry.table_id)?.ok_or_else(|| {
                SchemaError::TableNotExists {
                    schema: entry.old_schema_name.o.clone(),
                    table: entry.old_table_name.o.clone(),
                }
            })?;
            let new_db = m
                .get_database(entry.new_schema_id)?
                .ok_or(MetaError::DatabaseNotExists(entry.new_schema_id))?;
            if m.table_name_exists(entry.new_schema_id, &entry.new_table_name.l) {
                return Err(SchemaError::TableExists {
                    schema: new_db.name.o,
                    table: entry.new_table_name.o.clone(),
                }
                .into());
            }
            table.name = entry.new_table_name.clone();
            m.rename_table(entry.old_schema_id, entry.new_schema_id, &table)?;
            opts.push(AffectedOption {
                schema_id: entry.new_schema_id,
                table_id: entry.table_id,
                old_schema_id: entry.old_schema_id,
                old_table_id: entry.table_id,
            });
        }
        finish_job(job, SchemaState::Public);

        let mut opts = opts.into_iter();
        let first = opts.next().ok_or_else(|| unexpected_args(job))?;
        let mut diff = SchemaDiff::for_job(job, 0);
        diff.schema_id = first.schema_id;
        diff.table_id = first.table_id;
        diff.old_schema_id = first.old_schema_id;
        diff.old_table_id = first.old_table_id;
        diff.affected_opts = opts.collect();
        Ok(Some(diff))
    }
}

/// `AUTO_INCREMENT = v` and `AUTO_RANDOM_BASE = v`.
///
/// The persisted base becomes `v - 1` so the next value handed out is `v`.
/// Without `force` the base only moves forward: a base already raised past
/// `v - 1` by inserts or another rebase is kept.
pub struct RebaseAutoId;

impl JobHandler for RebaseAutoId {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::RebaseAutoId { new_base, force } = job.args else {
            return Err(unexpected_args(job));
        };
        let mut table = get_table_info(m, job)?;
        let tp = if job.tp == ActionType::RebaseAutoRandomBase {
            if !table.contains_auto_random_bits() {
                return Err(AutoIdError::rebase_not_applicable().into());
            }
            let max = auto_random_layout(&table).max_incremental();
            if new_base.saturating_sub(1) > max {
                return Err(AutoIdError::InvalidAutoRandom(format!(
                    "alter auto_random_base to {} overflows the incremental bits, max allowed is {}",
                    new_base, max
                ))
                .into());
            }
            table.auto_rand_id = new_base;
            AllocatorType::AutoRandom
        } else {
            table.auto_inc_id = new_base;
            AllocatorType::RowId
        };

        let current = m.get_auto_id(table.id, tp)?;
        let target = new_base.saturating_sub(1);
        let base = if force { target } else { current.max(target) };
        m.set_auto_id(table.id, tp, base);
        m.update_table(job.schema_id, &table)?;
        debug!(job_id = job.id, table_id = table.id, ?tp, current, base, force, "auto id base changed");

        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}

pub struct ShardRowId;

impl JobHandler for ShardRowId {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::ShardRowId { bits } = job.args else {
            return Err(unexpected_args(job));
        };
        let mut table = get_table_info(m, job)?;
        table.shard_row_id_bits = bits;
        table.max_shard_row_id_bits = table.max_shard_row_id_bits.max(bits);
        m.update_table(job.schema_id, &table)?;
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}

pub struct ModifyAutoIdCache;

impl JobHandler for ModifyAutoIdCache {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::ModifyAutoIdCache { cache } = job.args else {
            return Err(unexpected_args(job));
        };
        let mut table = get_table_info(m, job)?;
        table.auto_id_cache = cache;
        m.update_table(job.schema_id, &table)?;
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}

pub struct AlterTablePlacement;

impl JobHandler for AlterTablePlacement {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::AlterTablePlacement { policy_ref } = &job.args else {
            return Err(unexpected_args(job));
        };
        let policy_ref = policy_ref.clone();
        check_policy_ref(m, policy_ref.as_ref())?;
        let mut table = get_table_info(m, job)?;
        table.placement_policy_ref = policy_ref;
        m.update_table(job.schema_id, &table)?;
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::vars::DdlVars;
    use crate::kv::{MemStore, StoreRef, run_in_new_txn};
    use crate::model::{DatabaseInfo, PartitionDefinition, PartitionInfo, PartitionType, RenameEntry};

    fn setup() -> StoreRef {
        let store = MemStore::new_ref();
        run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            m.create_database(&DatabaseInfo::new(1, "test", "utf8mb4", "utf8mb4_bin"))?;
            for (id, name) in [(10, "a"), (11, "b")] {
                let mut t = TableInfo::new(id, name);
                t.state = SchemaState::Public;
                m.create_table(1, &t)?;
            }
            Ok(())
        })
        .unwrap();
        store
    }

    fn entry(table_id: i64, from: &str, to: &str) -> RenameEntry {
        RenameEntry {
            table_id,
            old_schema_id: 1,
            old_schema_name: "test".into(),
            old_table_name: from.into(),
            new_schema_id: 1,
            new_table_name: to.into(),
        }
    }

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

    #[test]
    fn test_swap_through_temporary_name() {
        let store = setup();
        let mut job = Job::new(
            ActionType::RenameTables,
            1,
            10,
            JobArgs::RenameTables {
                entries: vec![entry(10, "a", "tmp"), entry(11, "b", "a"), entry(10, "tmp", "b")],
            },
        );
        let diff = run(&store, &RenameTables, &mut job).unwrap().unwrap();
        assert_eq!(diff.affected_opts.len(), 2);

        run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            assert_eq!(m.get_table_by_name(1, "a")?.unwrap().id, 11);
            assert_eq!(m.get_table_by_name(1, "b")?.unwrap().id, 10);
            assert!(!m.table_name_exists(1, "tmp"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_rename_onto_live_name_changes_nothing() {
        let store = setup();
        let mut job = Job::new(
            ActionType::RenameTables,
            1,
            10,
            JobArgs::RenameTables {
                entries: vec![entry(10, "a", "c"), entry(11, "b", "c")],
            },
        );
        let err = run(&store, &RenameTables, &mut job).unwrap_err();
        assert_eq!(err.to_string(), "[schema:1050]Table 'test.c' already exists");
        run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            assert!(m.table_name_exists(1, "a"));
            assert!(!m.table_name_exists(1, "c"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_rebase_is_max_wins_unless_forced() {
        let store = setup();
        run_in_new_txn(&store, 3, |txn| {
            Meta::new(txn).set_auto_id(10, AllocatorType::RowId, 500);
            Ok(())
        })
        .unwrap();

        let mut job = Job::new(ActionType::RebaseAutoId, 1, 10, JobArgs::RebaseAutoId { new_base: 100, force: false });
        run(&store, &RebaseAutoId, &mut job).unwrap();
        let base = run_in_new_txn(&store, 3, |txn| Meta::new(txn).get_auto_id(10, AllocatorType::RowId)).unwrap();
        assert_eq!(base, 500);

        let mut job = Job::new(ActionType::RebaseAutoId, 1, 10, JobArgs::RebaseAutoId { new_base: 100, force: true });
        run(&store, &RebaseAutoId, &mut job).unwrap();
        let base = run_in_new_txn(&store, 3, |txn| Meta::new(txn).get_auto_id(10, AllocatorType::RowId)).unwrap();
        assert_eq!(base, 99);
    }

    #[test]
    fn test_auto_random_rebase_requires_auto_random_table() {
        let store = setup();
        let mut job = Job::new(
            ActionType::RebaseAutoRandomBase,
            1,
            10,
            JobArgs::RebaseAutoId { new_base: 100, force: false },
        );
        let err = run(&store, &RebaseAutoId, &mut job).unwrap_err();
        assert_eq!(
            err.to_string(),
            "[autoid:8216]Invalid auto random: alter auto_random_base of a non auto_random table"
        );
    }

    #[test]
    fn test_truncate_renews_partition_ids_and_auto_id_base() {
        let store = setup();
        run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            let mut t = m.get_table(1, 10)?.unwrap();
            t.auto_inc_id = 50;
            t.partition = Some(PartitionInfo {
                tp: PartitionType::Range,
                expr: "id".to_string(),
                definitions: vec![PartitionDefinition {
                    id: 20,
                    name: "p0".into(),
                    less_than: vec!["MAXVALUE".to_string()],
                    in_values: Vec::new(),
                    placement_policy_ref: None,
                }],
            });
            m.update_table(1, &t)?;
            m.set_auto_id(10, AllocatorType::RowId, 7);
            Ok(())
        })
        .unwrap();

        let mut job = Job::new(ActionType::TruncateTable, 1, 10, JobArgs::TruncateTable { new_table_id: 30 });
        let diff = run(&store, &TruncateTable, &mut job).unwrap().unwrap();
        assert_eq!((diff.table_id, diff.old_table_id), (30, 10));

        run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            assert!(m.get_table(1, 10)?.is_none());
            let t = m.get_table(1, 30)?.unwrap();
            let pid = t.partition.unwrap().definitions[0].id;
            assert_ne!(pid, 20);
            assert_ne!(pid, 30);
            assert_eq!(m.get_auto_id(30, AllocatorType::RowId)?, 49);
            Ok(())
        })
        .unwrap();
    }
}
