//! Column jobs.

use tracing::info;

use crate::ddl::handler::{JobContext, JobHandler, finish_job, get_table_info, unexpected_args, version_diff};
use crate::errors::{Result, SchemaError, TableError, ValidationError};
use crate::meta::Meta;
use crate::model::{CIStr, ColumnInfo, ColumnPosition, Job, JobArgs, JobState, SchemaDiff, SchemaState, TableInfo};
use crate::table::{drop_index_data, scan_rows};

/// Move the column at `from` to the place `pos` describes.
fn relocate(table: &mut TableInfo, from: usize, pos: &ColumnPosition) -> Result<()> {
    let target = match pos {
        ColumnPosition::None => return Ok(()),
        ColumnPosition::First => 0,
        ColumnPosition::After(name) => {
            let after = table
                .columns
                .iter()
                .position(|c| c.name.l == name.l)
                .ok_or_else(|| SchemaError::ColumnNotExists {
                    column: name.o.clone(),
                    table: table.name.o.clone(),
                })?;
            if after < from { after + 1 } else { after }
        }
    };
    let col = table.columns.remove(from);
    table.columns.insert(target, col);
    Ok(())
}

fn set_columns_state(table: &mut TableInfo, names: &[CIStr], state: SchemaState) {
    for col in table.columns.iter_mut().filter(|c| names.iter().any(|n| n.l == c.name.l)) {
        col.state = state;
    }
}

/// None -> delete only -> write only -> write reorganization -> public.
///
/// New columns are appended while they are invisible; their requested
/// positions take effect when they become public. Rows written earlier read
/// the column's original default.
pub struct AddColumns;

impl JobHandler for AddColumns {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::AddColumns { columns, positions, .. } = &job.args else {
            return Err(unexpected_args(job));
        };
        let (columns, positions) = (columns.clone(), positions.clone());
        let names: Vec<CIStr> = columns.iter().map(|c| c.name.clone()).collect();
        let mut table = get_table_info(m, job)?;

        match job.schema_state {
            SchemaState::None => {
                for mut col in columns {
                    if table.find_column(&col.name.l).is_some() {
                        return Err(SchemaError::ColumnExists(col.name.o).into());
                    }
                    table.max_column_id += 1;
                    col.id = table.max_column_id;
                    col.offset = table.columns.len();
                    col.state = SchemaState::DeleteOnly;
                    table.columns.push(col);
                }
                job.schema_state = SchemaState::DeleteOnly;
            }
            SchemaState::DeleteOnly => {
                set_columns_state(&mut table, &names, SchemaState::WriteOnly);
                job.schema_state = SchemaState::WriteOnly;
            }
            SchemaState::WriteOnly => {
                set_columns_state(&mut table, &names, SchemaState::WriteReorganization);
                job.schema_state = SchemaState::WriteReorganization;
            }
            _ => {
                for (name, pos) in names.iter().zip(&positions) {
                    if let Some(from) = table.columns.iter().position(|c| c.name.l == name.l) {
                        relocate(&mut table, from, pos)?;
                    }
                }
                set_columns_state(&mut table, &names, SchemaState::Public);
                finish_job(job, SchemaState::Public);
            }
        }
        table.reset_offsets();
        m.update_table(job.schema_id, &table)?;
        Ok(version_diff(job))
    }

    fn on_rollback(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::AddColumns { columns, .. } = &job.args else {
            return Err(unexpected_args(job));
        };
        let names: Vec<String> = columns.iter().map(|c| c.name.l.clone()).collect();
        let mut table = get_table_info(m, job)?;
        let before = table.columns.len();
        table
            .columns
            .retain(|c| c.state == SchemaState::Public || !names.contains(&c.name.l));
        job.state = JobState::RollbackDone;
        if table.columns.len() == before {
            return Ok(None);
        }
        table.reset_offsets();
        m.update_table(job.schema_id, &table)?;
        job.schema_state = SchemaState::None;
        Ok(version_diff(job))
    }
}

/// Public -> write only -> delete only -> delete reorganization -> gone.
///
/// Single-column indexes on the column are dropped along with it.
pub struct DropColumn;

impl JobHandler for DropColumn {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::DropColumn { name } = &job.args else {
            return Err(unexpected_args(job));
        };
        let name = name.clone();
        let mut table = get_table_info(m, job)?;
        let Some(col) = table.find_column(&name.l) else {
            return Err(SchemaError::CantDropFieldOrKey(name.o).into());
        };
        let state = col.state;
        let covering: Vec<i64> = table
            .indices
            .iter()
            .filter(|i| i.columns.len() == 1 && i.columns[0].name.l == name.l)
            .map(|i| i.id)
            .collect();
        let next = match state {
            SchemaState::Public => {
                if table.public_columns().count() == 1 {
                    return Err(ValidationError::CantRemoveAllFields.into());
                }
                // Invisible columns live at the end until removed.
                if let Some(from) = table.columns.iter().position(|c| c.name.l == name.l) {
                    let col = table.columns.remove(from);
                    table.columns.push(col);
                }
                Some(SchemaState::WriteOnly)
            }
            SchemaState::WriteOnly => Some(SchemaState::DeleteOnly),
            SchemaState::DeleteOnly => Some(SchemaState::DeleteReorganization),
            _ => None,
        };
        match next {
            Some(next) => {
                if let Some(col) = table.find_column_mut(&name.l) {
                    col.state = next;
                }
                for index in table.indices.iter_mut().filter(|i| covering.contains(&i.id)) {
                    index.state = next;
                }
                job.schema_state = next;
            }
            None => {
                table.columns.retain(|c| c.name.l != name.l);
                table.indices.retain(|i| !covering.contains(&i.id));
                for index_id in &covering {
                    drop_index_data(m.txn(), table.id, *index_id);
                }
                finish_job(job, SchemaState::None);
            }
        }
        table.reset_offsets();
        m.update_table(job.schema_id, &table)?;
        Ok(version_diff(job))
    }
}

/// Rename and/or retype a column in place. Only conversions that keep every
/// stored value representable are accepted, so no row rewrite is needed.
///
/// Adding NOT NULL to a nullable column takes two steps: the column first
/// rejects NULL writes (write only), then existing rows are checked and the
/// change is applied. A NULL found by the check rolls the job back.
pub struct ModifyColumn;

fn modify_target(table: &TableInfo, old_name: &CIStr) -> Result<usize> {
    table
        .columns
        .iter()
        .position(|c| c.name.l == old_name.l && c.state == SchemaState::Public)
        .ok_or_else(|| {
            SchemaError::ColumnNotExists {
                column: old_name.o.clone(),
                table: table.name.o.clone(),
            }
            .into()
        })
}

fn check_no_nulls(m: &mut Meta<'_>, table: &TableInfo, offset: usize) -> Result<()> {
    let rows = scan_rows(m.txn(), table)?;
    if rows.iter().any(|row| row.values[offset].is_null()) {
        return Err(TableError::InvalidUseOfNull.into());
    }
    Ok(())
}

impl JobHandler for ModifyColumn {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::ModifyColumn { column, old_name, position } = &job.args else {
            return Err(unexpected_args(job));
        };
        let (column, old_name, position) = (column.clone(), old_name.clone(), position.clone());
        let mut table = get_table_info(m, job)?;
        let from = modify_target(&table, &old_name)?;
        if column.name.l != old_name.l && table.find_column(&column.name.l).is_some() {
            return Err(SchemaError::ColumnExists(column.name.o).into());
        }

        let adds_not_null = column.not_null && !table.columns[from].not_null;
        if adds_not_null {
            match job.schema_state {
                SchemaState::None => {
                    table.columns[from].prevent_null_insert = true;
                    m.update_table(job.schema_id, &table)?;
                    job.schema_state = SchemaState::WriteOnly;
                    return Ok(version_diff(job));
                }
                _ => {
                    check_no_nulls(m, &table, from)?;
                    info!(job_id = job.id, column = %old_name, "no NULL values found, applying NOT NULL");
                }
            }
        }

        let old = &table.columns[from];
        let updated = ColumnInfo {
            id: old.id,
            offset: old.offset,
            state: SchemaState::Public,
            origin_default: old.origin_default.clone(),
            hidden: old.hidden,
            prevent_null_insert: false,
            ..column
        };
        for index in &mut table.indices {
            for ic in index.columns.iter_mut().filter(|ic| ic.name.l == old_name.l) {
                ic.name = updated.name.clone();
            }
        }
        table.columns[from] = updated;
        relocate(&mut table, from, &position)?;
        table.reset_offsets();
        m.update_table(job.schema_id, &table)?;
        finish_job(job, SchemaState::Public);
        Ok(version_diff(job))
    }

    fn on_rollback(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::ModifyColumn { old_name, .. } = &job.args else {
            return Err(unexpected_args(job));
        };
        let old_name = old_name.clone();
        let mut table = get_table_info(m, job)?;
        job.state = JobState::RollbackDone;
        let Some(col) = table
            .columns
            .iter_mut()
            .find(|c| c.name.l == old_name.l && c.prevent_null_insert)
        else {
            return Ok(None);
        };
        col.prevent_null_insert = false;
        m.update_table(job.schema_id, &table)?;
        job.schema_state = SchemaState::None;
        Ok(version_diff(job))
    }
}

pub struct SetDefaultValue;

impl JobHandler for SetDefaultValue {
    fn on_job(&self, _ctx: &JobContext<'_>, m: &mut Meta<'_>, job: &mut Job) -> Result<Option<SchemaDiff>> {
        let JobArgs::SetDefaultValue { column } = &job.args else {
            return Err(unexpected_args(job));
        };
        let column = column.clone();
        let mut table = get_table_info(m, job)?;
        let table_name = table.name.o.clone();
        let col = table
            .find_column_mut(&column.name.l)
            .filter(|c| c.state == SchemaState::Public)
            .ok_or_else(|| SchemaError::ColumnNotExists {
                column: column.name.o.clone(),
                table: table_name,
            })?;
        col.default_value = column.default_value;
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
    use crate::model::{ActionType, DatabaseInfo, Datum, FieldType};

    fn column(name: &str) -> ColumnInfo {
        ColumnInfo {
            id: 0,
            name: name.into(),
            offset: 0,
            field_type: FieldType::int(),
            default_value: None,
            origin_default: Some(Datum::Int(7)),
            generated: None,
            not_null: false,
            prevent_null_insert: false,
            auto_increment: false,
            primary_key: false,
            hidden: false,
            state: SchemaState::Public,
            comment: String::new(),
        }
    }

    fn setup() -> StoreRef {
        let store = MemStore::new_ref();
        run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            m.create_database(&DatabaseInfo::new(1, "test", "utf8mb4", "utf8mb4_bin"))?;
            let mut t = TableInfo::new(10, "t");
            t.state = SchemaState::Public;
            for (i, name) in ["a", "b"].iter().enumerate() {
                let mut c = column(name);
                c.id = i as i64 + 1;
                c.offset = i;
                t.columns.push(c);
            }
            t.max_column_id = 2;
            m.create_table(1, &t)
        })
        .unwrap();
        store
    }

    fn step(store: &StoreRef, handler: &dyn JobHandler, job: &mut Job, rollback: bool) -> Option<SchemaDiff> {
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
        .unwrap()
    }

    fn table(store: &StoreRef) -> TableInfo {
        run_in_new_txn(store, 3, |txn| Meta::new(txn).get_table(1, 10)).unwrap().unwrap()
    }

    #[test]
    fn test_add_column_first_walks_states() {
        let store = setup();
        let mut job = Job::new(
            ActionType::AddColumns,
            1,
            10,
            JobArgs::AddColumns {
                columns: vec![column("c")],
                positions: vec![ColumnPosition::First],
                if_not_exists: false,
            },
        );
        let mut states = Vec::new();
        while job.state != JobState::Done {
            step(&store, &AddColumns, &mut job, false);
            states.push(table(&store).find_column("c").unwrap().state);
        }
        assert_eq!(
            states,
            vec![
                SchemaState::DeleteOnly,
                SchemaState::WriteOnly,
                SchemaState::WriteReorganization,
                SchemaState::Public
            ]
        );
        let t = table(&store);
        let names: Vec<&str> = t.columns.iter().map(|c| c.name.o.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(t.find_column("c").unwrap().id, 3);
    }

    #[test]
    fn test_add_column_rollback_removes_it() {
        let store = setup();
        let mut job = Job::new(
            ActionType::AddColumns,
            1,
            10,
            JobArgs::AddColumns {
                columns: vec![column("c")],
                positions: vec![ColumnPosition::None],
                if_not_exists: false,
            },
        );
        step(&store, &AddColumns, &mut job, false);
        step(&store, &AddColumns, &mut job, false);
        assert!(job.is_rollbackable());
        assert!(step(&store, &AddColumns, &mut job, true).is_some());
        assert_eq!(job.state, JobState::RollbackDone);
        assert!(table(&store).find_column("c").is_none());
    }

    #[test]
    fn test_drop_column_hides_then_removes() {
        let store = setup();
        let mut job = Job::new(ActionType::DropColumn, 1, 10, JobArgs::DropColumn { name: "a".into() });
        step(&store, &DropColumn, &mut job, false);
        let t = table(&store);
        assert_eq!(t.public_columns().count(), 1);
        assert_eq!(t.columns.last().unwrap().name.o, "a");
        assert!(!job.is_rollbackable());
        while job.state != JobState::Done {
            step(&store, &DropColumn, &mut job, false);
        }
        let t = table(&store);
        assert_eq!(t.columns.len(), 1);
        assert_eq!(t.columns[0].offset, 0);

        let mut last = Job::new(ActionType::DropColumn, 1, 10, JobArgs::DropColumn { name: "b".into() });
        let vars = DdlVars::default();
        let ctx = JobContext {
            store: &store,
            vars: &vars,
            worker: "test",
            txn_retry_limit: 3,
        };
        let err = run_in_new_txn(&store, 3, |txn| DropColumn.on_job(&ctx, &mut Meta::new(txn), &mut last)).unwrap_err();
        assert_eq!(err.code(), 1090);
    }

    fn not_null_job(name: &str) -> Job {
        let mut col = column(name);
        col.not_null = true;
        Job::new(
            ActionType::ModifyColumn,
            1,
            10,
            JobArgs::ModifyColumn {
                column: col,
                old_name: name.into(),
                position: ColumnPosition::None,
            },
        )
    }

    #[test]
    fn test_modify_to_not_null_rejects_nulls_first() {
        let store = setup();
        let mut job = not_null_job("b");
        step(&store, &ModifyColumn, &mut job, false);
        assert_eq!(job.schema_state, SchemaState::WriteOnly);
        let b = table(&store).find_column("b").cloned().unwrap();
        assert!(b.prevent_null_insert);
        assert!(!b.not_null);

        step(&store, &ModifyColumn, &mut job, false);
        assert_eq!(job.state, JobState::Done);
        let b = table(&store).find_column("b").cloned().unwrap();
        assert!(b.not_null);
        assert!(!b.prevent_null_insert);
    }

    #[test]
    fn test_modify_to_not_null_rollback_clears_flag() {
        let store = setup();
        let mut job = not_null_job("a");
        step(&store, &ModifyColumn, &mut job, false);
        assert!(job.is_rollbackable());
        assert!(step(&store, &ModifyColumn, &mut job, true).is_some());
        assert_eq!(job.state, JobState::RollbackDone);
        let a = table(&store).find_column("a").cloned().unwrap();
        assert!(!a.prevent_null_insert);
        assert!(!a.not_null);
    }
}
