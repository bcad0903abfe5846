use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::autoid::{AllocatorOptions, AllocatorType, Allocators};
use crate::errors::{MetaError, Result};
use crate::infoschema::{InfoSchema, SchemaTables, TableHandle};
use crate::kv::StoreRef;
use crate::meta::Meta;
use crate::model::{ActionType, DatabaseInfo, PolicyInfo, SchemaDiff, TableInfo};

/// Builds the next InfoSchema generation from the previous one plus diffs,
/// or from a full metadata scan.
pub struct Builder {
    store: StoreRef,
    opts: AllocatorOptions,
    is: InfoSchema,
}

/// Allocator kinds whose cached ranges a diff of this type makes stale.
fn invalidated_allocators(tp: ActionType) -> &'static [AllocatorType] {
    match tp {
        ActionType::RenameTable | ActionType::RenameTables | ActionType::ModifyTableAutoIdCache => {
            &[AllocatorType::RowId, AllocatorType::AutoRandom]
        }
        ActionType::RebaseAutoId | ActionType::ShardRowId => &[AllocatorType::RowId],
        ActionType::RebaseAutoRandomBase => &[AllocatorType::AutoRandom],
        _ => &[],
    }
}

impl Builder {
    pub fn new(store: StoreRef, opts: AllocatorOptions) -> Self {
        Self {
            store,
            opts,
            is: InfoSchema::default(),
        }
    }

    /// Start from a copy of `old`; its tables and allocators are shared.
    pub fn init_with_old(mut self, old: &InfoSchema) -> Self {
        self.is = old.clone();
        self
    }

    /// Start from scratch with fully materialised databases (tables filled in).
    pub fn init_with_db_infos(mut self, dbs: Vec<DatabaseInfo>, policies: Vec<PolicyInfo>, version: i64) -> Result<Self> {
        self.is = InfoSchema {
            version,
            ..InfoSchema::default()
        };
        for mut db in dbs {
            let tables = std::mem::take(&mut db.tables);
            let db_id = db.id;
            self.put_schema(db, HashMap::new());
            for table in tables {
                let allocators = Allocators::from_table_info(&self.store, &table, self.opts);
                self.insert_table(db_id, table, allocators)?;
            }
        }
        for policy in policies {
            self.is.policies.insert(policy.name.l.clone(), Arc::new(policy));
        }
        Ok(self)
    }

    /// Start from every object currently in the metadata store.
    pub fn load_full(self, m: &mut Meta<'_>) -> Result<Self> {
        let version = m.get_schema_version()?;
        let mut dbs = m.list_databases()?;
        for db in &mut dbs {
            db.tables = m.list_tables(db.id)?;
        }
        let policies = m.list_policies()?;
        debug!(schema_version = version, databases = dbs.len(), "full schema load");
        self.init_with_db_infos(dbs, policies, version)
    }

    /// Apply one committed diff; returns the IDs of tables it replaced.
    pub fn apply_diff(&mut self, m: &mut Meta<'_>, diff: &SchemaDiff) -> Result<Vec<i64>> {
        self.is.version = diff.version;
        if diff.tp.is_policy_level() {
            self.apply_policy(m, diff.schema_id)?;
            return Ok(Vec::new());
        }
        if diff.tp.is_schema_level() {
            self.apply_schema(m, diff.schema_id)?;
            return Ok(Vec::new());
        }

        let invalidated = invalidated_allocators(diff.tp);
        let mut targets = vec![(diff.schema_id, diff.table_id, diff.old_table_id)];
        targets.extend(
            diff.affected_opts
                .iter()
                .map(|opt| (opt.schema_id, opt.table_id, opt.old_table_id)),
        );

        let mut changed = Vec::new();
        for (schema_id, table_id, old_table_id) in targets {
            if old_table_id != 0 && old_table_id != table_id {
                self.remove_table(old_table_id);
                changed.push(old_table_id);
            }
            let previous = self.remove_table(table_id);
            if let Some(info) = m.get_table(schema_id, table_id)? {
                let allocators = match previous {
                    Some(old) => old.allocators.rebuild(&self.store, &info, self.opts, invalidated),
                    None => Allocators::from_table_info(&self.store, &info, self.opts),
                };
                self.insert_table(schema_id, info, allocators)?;
            }
            changed.push(table_id);
        }
        debug!(schema_version = diff.version, tp = %diff.tp, ?changed, "schema diff applied");
        Ok(changed)
    }

    pub fn build(self) -> Arc<InfoSchema> {
        Arc::new(self.is)
    }

    fn apply_schema(&mut self, m: &mut Meta<'_>, schema_id: i64) -> Result<()> {
        let existing = self
            .is
            .schema_names
            .get(&schema_id)
            .and_then(|name| self.is.schemas.get(name))
            .map(|s| s.tables.clone());
        match m.get_database(schema_id)? {
            Some(db) => {
                self.remove_schema_entry(schema_id);
                self.put_schema(db, existing.unwrap_or_default());
            }
            None => {
                if let Some(tables) = existing {
                    for handle in tables.values() {
                        self.is.tables_by_id.remove(&handle.meta.id);
                    }
                }
                self.remove_schema_entry(schema_id);
            }
        }
        Ok(())
    }

    fn apply_policy(&mut self, m: &mut Meta<'_>, policy_id: i64) -> Result<()> {
        self.is.policies.retain(|_, p| p.id != policy_id);
        if let Some(policy) = m.get_policy(policy_id)? {
            self.is.policies.insert(policy.name.l.clone(), Arc::new(policy));
        }
        Ok(())
    }

    fn put_schema(&mut self, db: DatabaseInfo, tables: HashMap<String, Arc<TableHandle>>) {
        let name = db.name.l.clone();
        self.is.schema_names.insert(db.id, name.clone());
        self.is.schemas.insert(
            name,
            SchemaTables {
                info: Arc::new(db),
                tables,
            },
        );
    }

    fn remove_schema_entry(&mut self, schema_id: i64) {
        if let Some(name) = self.is.schema_names.remove(&schema_id) {
            self.is.schemas.remove(&name);
        }
    }

    fn insert_table(&mut self, db_id: i64, table: TableInfo, allocators: Allocators) -> Result<()> {
        let name = self
            .is
            .schema_names
            .get(&db_id)
            .cloned()
            .ok_or(MetaError::DatabaseNotExists(db_id))?;
        let handle = Arc::new(TableHandle {
            meta: Arc::new(table),
            db_id,
            allocators,
        });
        if let Some(schema) = self.is.schemas.get_mut(&name) {
            schema.tables.insert(handle.meta.name.l.clone(), handle.clone());
        }
        self.is.tables_by_id.insert(handle.meta.id, handle);
        Ok(())
    }

    fn remove_table(&mut self, table_id: i64) -> Option<Arc<TableHandle>> {
        let handle = self.is.tables_by_id.remove(&table_id)?;
        if let Some(schema) = self
            .is
            .schema_names
            .get(&handle.db_id)
            .and_then(|name| self.is.schemas.get_mut(name))
        {
            schema
                .tables
                .retain(|_, t| t.meta.id != table_id);
        }
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemStore, run_in_new_txn};
    use crate::model::{AffectedOption, Job, JobArgs, SchemaState};

    fn public_table(id: i64, name: &str) -> TableInfo {
        let mut t = TableInfo::new(id, name);
        t.state = SchemaState::Public;
        t
    }

    fn setup(store: &StoreRef) -> Arc<InfoSchema> {
        run_in_new_txn(store, 3, |txn| {
            let mut m = Meta::new(txn);
            m.create_database(&DatabaseInfo::new(1, "a", "utf8mb4", "utf8mb4_bin"))?;
            m.create_database(&DatabaseInfo::new(2, "b", "utf8mb4", "utf8mb4_bin"))?;
            m.create_table(1, &public_table(10, "t"))?;
            m.gen_schema_version()
        })
        .unwrap();
        run_in_new_txn(store, 3, |txn| {
            Builder::new(store.clone(), AllocatorOptions::default())
                .load_full(&mut Meta::new(txn))
                .map(Builder::build)
        })
        .unwrap()
    }

    #[test]
    fn test_full_load() {
        let store = MemStore::new_ref();
        let is = setup(&store);
        assert_eq!(is.schema_meta_version(), 1);
        assert!(is.table_exists("A", "T"));
        assert_eq!(is.all_schemas().len(), 2);
        assert_eq!(is.table_by_id(10).unwrap().db_id, 1);
    }

    #[test]
    fn test_rename_diff_moves_table_and_refreshes_allocators() {
        let store = MemStore::new_ref();
        let old = setup(&store);
        let old_alloc = old.table_by_id(10).unwrap().allocator(AllocatorType::RowId).unwrap();

        let next = run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            let mut t = m.get_table(1, 10)?.unwrap();
            t.name = "t2".into();
            m.rename_table(1, 2, &t)?;
            let mut job = Job::new(ActionType::RenameTable, 2, 10, JobArgs::None);
            job.id = 99;
            let mut diff = SchemaDiff::for_job(&job, m.gen_schema_version()?);
            diff.old_schema_id = 1;
            let mut b = Builder::new(store.clone(), AllocatorOptions::default()).init_with_old(&old);
            b.apply_diff(&mut m, &diff)?;
            Ok(b.build())
        })
        .unwrap();

        assert!(old.table_exists("a", "t"));
        assert!(!next.table_exists("a", "t"));
        assert!(next.table_exists("b", "t2"));
        let new_alloc = next.table_by_id(10).unwrap().allocator(AllocatorType::RowId).unwrap();
        assert!(!Arc::ptr_eq(&old_alloc, &new_alloc));
    }

    #[test]
    fn test_unrelated_diff_shares_allocators() {
        let store = MemStore::new_ref();
        let old = setup(&store);
        let next = run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            m.create_table(2, &public_table(11, "u"))?;
            let mut diff = SchemaDiff::for_job(&Job::new(ActionType::CreateTable, 2, 11, JobArgs::None), m.gen_schema_version()?);
            diff.affected_opts.push(AffectedOption {
                schema_id: 1,
                table_id: 10,
                old_schema_id: 1,
                old_table_id: 10,
            });
            let mut b = Builder::new(store.clone(), AllocatorOptions::default()).init_with_old(&old);
            b.apply_diff(&mut m, &diff)?;
            Ok(b.build())
        })
        .unwrap();
        assert!(next.table_exists("b", "u"));
        assert!(Arc::ptr_eq(
            &old.table_by_id(10).unwrap().allocator(AllocatorType::RowId).unwrap(),
            &next.table_by_id(10).unwrap().allocator(AllocatorType::RowId).unwrap()
        ));
    }

    #[test]
    fn test_drop_schema_diff_removes_only_its_tables() {
        let store = MemStore::new_ref();
        let old = setup(&store);
        let next = run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            m.drop_database(1)?;
            let diff = SchemaDiff::for_job(&Job::new(ActionType::DropSchema, 1, 0, JobArgs::None), m.gen_schema_version()?);
            let mut b = Builder::new(store.clone(), AllocatorOptions::default()).init_with_old(&old);
            b.apply_diff(&mut m, &diff)?;
            Ok(b.build())
        })
        .unwrap();
        assert!(!next.schema_exists("a"));
        assert!(next.schema_exists("b"));
        assert!(next.table_by_id(10).is_none());
    }
}
