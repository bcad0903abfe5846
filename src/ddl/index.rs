//! Index jobs. Adding an index backfills existing rows during write
//! reorganization; a failure before the index turns public rolls it back.

use tracing::info;

use crate::ddl::handler::{JobContext, JobHandler, finish_job, get_table_info, unexpected_args, version_diff};
use crate::ddl::reorg::backfill_index;
use crate::errors::{Result, SchemaError, ValidationError};
use crate::meta::Meta;
use crate::model::{IndexInfo, Job, JobArgs, JobState, SchemaDiff, SchemaState, TableInfo};
use crate::table::drop_index_data;

fn set_index_state(table: &mut TableInfo, name: &str, hidden: &[String], state: SchemaState) {
    if let Some(index) = table.find_index_mut(name) {
        index.state = state;
    }
    for col in table.columns.iter_mut().filter(|c| hidden.contains(&c.name.l)) {
        col.state = state;
    }
}

/// Remove an index and the hidden columns backing its expressions.
fn remove_index(table: &mut TableInfo, name: &str) -> Option<i64> {
    let pos = table.indices.iter().position(|i| i.name.l == name)?;
    let index = table.indices.remove(pos);
    let still_used = |col: &str, indices: &[IndexInfo]| indices.iter().any(|i| i.columns.iter().any(|ic| ic.name.l == col));
    let backing: Vec<String> = index
        .columns
        .iter()
        .map(|ic| ic.name.l.clone())
        .filter(|col| !still_used(col, &table.indices))
        .collect();
    table.columns.retain(|c| !(c.hidden && backing.contains(&c.name.l)));
    table.reset_offsets();
    Some(index.id)
}

/// None -> delete only -> write only -> write reorganization -> public.
pub struct AddIndex;

impl JobHandler for AddIndex {
    fn on_job(&self, ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::AddIndex { index, hidden_columns } = &job.args else {
            return Err(unexpected_args(job));
        };
        let (index, hidden_columns) = (index.clone(), hidden_columns.clone());
        let hidden: Vec<String> = hidden_columns.iter().map(|c| c.name.l.clone()).collect();
        let mut table = get_table_info(m, job)?;

        match job.schema_state {
            SchemaState::None => {
                if table.find_index(&index.name.l).is_some() {
                    return Err(SchemaError::IndexExists(index.name.o).into());
                }
                if index.primary && table.primary_index().is_some() {
                    return Err(ValidationError::MultiplePriKey.into());
                }
                for mut col in hidden_columns {
                    if table.find_column(&col.name.l).is_some() {
                        return Err(SchemaError::ColumnExists(col.name.o).into());
                    }
                    table.max_column_id += 1;
                    col.id = table.max_column_id;
                    col.offset = table.columns.len();
                    col.hidden = true;
                    col.state = SchemaState::DeleteOnly;
                    table.columns.push(col);
                }
                let mut index = index;
                for ic in &mut index.columns {
                    let col = table.find_column(&ic.name.l).ok_or_else(|| SchemaError::ColumnNotExists {
                        column: ic.name.o.clone(),
                        table: table.name.o.clone(),
                    })?;
                    ic.offset = col.offset;
                }
                table.max_index_id += 1;
                index.id = table.max_index_id;
                index.state = SchemaState::DeleteOnly;
                table.indices.push(index);
                job.schema_state = SchemaState::DeleteOnly;
            }
            SchemaState::DeleteOnly => {
                set_index_state(&mut table, &index.name.l, &hidden, SchemaState::WriteOnly);
                job.schema_state = SchemaState::WriteOnly;
            }
            SchemaState::WriteOnly => {
                set_index_state(&mut table, &index.name.l, &hidden, SchemaState::WriteReorganization);
                job.schema_state = SchemaState::WriteReorganization;
                job.snapshot_ver = ctx.store.current_ts();
            }
            _ => {
                let target = table
                    .find_index(&index.name.l)
                    .cloned()
                    .ok_or_else(|| SchemaError::CantDropFieldOrKey(index.name.o.clone()))?;
                let added = backfill_index(ctx, job, &table, &target)?;
                job.row_count = added;
                set_index_state(&mut table, &index.name.l, &hidden, SchemaState::Public);
                info!(job_id = job.id, index = %index.name, rows = added, "index backfilled");
                finish_job(job, SchemaState::Public);
            }
        }
        m.update_table(job.schema_id, &table)?;
        Ok(version_diff(job))
    }

    fn on_rollback(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::AddIndex { index, .. } = &job.args else {
            return Err(unexpected_args(job));
        };
        let name = index.name.l.clone();
        let mut table = get_table_info(m, job)?;
        job.state = JobState::RollbackDone;
        m.remove_reorg_info(job.id);
        let public = table.find_index(&name).is_none_or(|i| i.state == SchemaState::Public);
        if public {
            return Ok(None);
        }
        if let Some(index_id) = remove_index(&mut table, &name) {
            drop_index_data(m.txn(), table.id, index_id);
        }
        m.update_table(job.schema_id, &table)?;
        job.schema_state = SchemaState::None;
        Ok(version_diff(job))
    }
}

/// Public -> write only -> delete only -> delete reorganization -> gone.
pub struct DropIndex;

impl JobHandler for DropIndex {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::DropIndex { name } = &job.args else {
            return Err(unexpected_args(job));
        };
        let name = name.clone();
        let mut table = get_table_info(m, job)?;
        let Some(index) = table.find_index(&name.l) else {
            return Err(SchemaError::CantDropFieldOrKey(name.o).into());
        };
        let hidden: Vec<String> = index
            .columns
            .iter()
            .filter(|ic| table.find_column(&ic.name.l).is_some_and(|c| c.hidden))
            .map(|ic| ic.name.l.clone())
            .collect();
        let next = match index.state {
            SchemaState::Public => Some(SchemaState::WriteOnly),
            SchemaState::WriteOnly => Some(SchemaState::DeleteOnly),
            SchemaState::DeleteOnly => Some(SchemaState::DeleteReorganization),
            _ => None,
        };
        match next {
            Some(next) => {
                set_index_state(&mut table, &name.l, &hidden, next);
                job.schema_state = next;
            }
            None => {
                if let Some(index_id) = remove_index(&mut table, &name.l) {
                    drop_index_data(m.txn(), table.id, index_id);
                }
                finish_job(job, SchemaState::None);
            }
        }
        m.update_table(job.schema_id, &table)?;
        Ok(version_diff(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::vars::DdlVars;
    use crate::kv::codec::index_prefix;
    use crate::kv::{MemStore, StoreRef, Transaction, run_in_new_txn};
    use crate::model::{ActionType, CIStr, ColumnInfo, DatabaseInfo, Datum, FieldType, IndexColumn};

    fn setup(values: &[i64]) -> StoreRef {
        let store = MemStore::new_ref();
        run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            m.create_database(&DatabaseInfo::new(1, "test", "utf8mb4", "utf8mb4_bin"))?;
            let mut t = TableInfo::new(10, "t");
            t.state = SchemaState::Public;
            t.columns.push(ColumnInfo {
                id: 1,
                name: "a".into(),
                offset: 0,
                field_type: FieldType::int(),
                default_value: None,
                origin_default: None,
                generated: None,
                not_null: false,
                prevent_null_insert: false,
                auto_increment: false,
                primary_key: false,
                hidden: false,
                state: SchemaState::Public,
                comment: String::new(),
            });
            t.max_column_id = 1;
            m.create_table(1, &t)
        })
        .unwrap();
        let mut txn = Transaction::begin(store.clone());
        for (i, v) in values.iter().enumerate() {
            let row = serde_json::to_vec(&vec![(1i64, Datum::Int(*v))]).unwrap();
            txn.set(
                crate::kv::codec::record_key(10, &crate::kv::codec::Handle::Int(i as i64 + 1)),
                row,
            );
        }
        txn.commit().unwrap();
        store
    }

    fn add_index_job(unique: bool) -> Job {
        let mut job = Job::new(
            ActionType::AddIndex,
            1,
            10,
            JobArgs::AddIndex {
                index: IndexInfo {
                    id: 0,
                    name: CIStr::new("ia"),
                    columns: vec![IndexColumn { name: "a".into(), offset: 0, length: None }],
                    unique,
                    primary: false,
                    state: SchemaState::None,
                    comment: String::new(),
                },
                hidden_columns: Vec::new(),
            },
        );
        job.id = 3;
        job
    }

    fn step(store: &StoreRef, handler: &dyn JobHandler, job: &mut Job, rollback: bool) -> Result<Option<SchemaDiff>> {
        let vars = DdlVars::default();
        let ctx = JobContext {
            store,
            vars: &vars,
            worker: "test",
            txn_retry_limit: 3,
        };
        run_in_new_txn(store, 3, |txn| {
            let mut m = Meta::new(txn);
            if rollback {
                handler.on_rollback(&ctx, &mut m, job)
            } else {
                handler.on_job(&ctx, &mut m, job)
            }
        })
    }

    fn table(store: &StoreRef) -> TableInfo {
        run_in_new_txn(store, 3, |txn| Meta::new(txn).get_table(1, 10)).unwrap().unwrap()
    }

    #[test]
    fn test_add_index_backfills_existing_rows() {
        let store = setup(&[5, 6, 7]);
        let mut job = add_index_job(false);
        while job.state != JobState::Done {
            step(&store, &AddIndex, &mut job, false).unwrap();
        }
        assert_eq!(job.row_count, 3);
        let t = table(&store);
        let index = t.find_index("ia").unwrap();
        assert_eq!(index.state, SchemaState::Public);
        assert_eq!(index.id, 1);
        let mut txn = Transaction::begin(store.clone());
        assert_eq!(txn.scan_prefix(&index_prefix(10, 1)).len(), 3);
    }

    #[test]
    fn test_unique_violation_rolls_back() {
        let store = setup(&[1, 1]);
        let mut job = add_index_job(true);
        let err = loop {
            match step(&store, &AddIndex, &mut job, false) {
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert_eq!(err.code(), 1062);
        assert!(job.is_rollbackable());
        step(&store, &AddIndex, &mut job, true).unwrap();
        assert_eq!(job.state, JobState::RollbackDone);
        assert!(table(&store).find_index("ia").is_none());
        let mut txn = Transaction::begin(store.clone());
        assert!(txn.scan_prefix(&index_prefix(10, 1)).is_empty());
    }

    #[test]
    fn test_drop_index_walks_down() {
        let store = setup(&[1]);
        let mut job = add_index_job(false);
        while job.state != JobState::Done {
            step(&store, &AddIndex, &mut job, false).unwrap();
        }
        let mut drop = Job::new(ActionType::DropIndex, 1, 10, JobArgs::DropIndex { name: "ia".into() });
        let mut seen = Vec::new();
        while drop.state != JobState::Done {
            step(&store, &DropIndex, &mut drop, false).unwrap();
            seen.push(drop.schema_state);
        }
        assert_eq!(
            seen,
            vec![
                SchemaState::WriteOnly,
                SchemaState::DeleteOnly,
                SchemaState::DeleteReorganization,
                SchemaState::None
            ]
        );
        assert!(table(&store).indices.is_empty());
        let mut txn = Transaction::begin(store.clone());
        assert!(txn.scan_prefix(&index_prefix(10, 1)).is_empty());
    }
}
