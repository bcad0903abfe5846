//! Record layer: row encoding, handle and auto-value allocation, and index
//! maintenance for rows written under a given table schema state.

use std::collections::HashMap;

use chrono::Utc;
use tracing::trace;

use crate::autoid::{AllocatorType, ShardIdLayout, auto_random_layout};
use crate::errors::{AutoIdError, DdlError, KvError, PlannerError, Result, TableError};
use crate::infoschema::TableHandle;
use crate::kv::codec::{self, Handle};
use crate::kv::{Key, Transaction, Value};
use crate::model::{ColumnInfo, Datum, DefaultValue, IndexInfo, SchemaState, TableInfo};

/// Session flags consulted while writing rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub allow_auto_random_explicit_insert: bool,
}

/// A decoded row: the handle plus one value per column offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub handle: Handle,
    pub values: Vec<Datum>,
}

fn encode_row(values: &[(i64, Datum)]) -> Result<Value> {
    Ok(serde_json::to_vec(values)?)
}

fn decode_row(bytes: &[u8]) -> Result<HashMap<i64, Datum>> {
    let pairs: Vec<(i64, Datum)> = serde_json::from_slice(bytes)?;
    Ok(pairs.into_iter().collect())
}

fn eval_generated(table: &TableInfo, values: &mut [Datum], virtual_only: bool) -> Result<()> {
    for col in &table.columns {
        let Some(generated) = &col.generated else { continue };
        if virtual_only && generated.stored {
            continue;
        }
        let value = {
            let lookup = |name: &str| -> Option<Datum> {
                table
                    .columns
                    .iter()
                    .find(|c| c.name.l == name)
                    .map(|c| values[c.offset].clone())
            };
            generated.expr.eval(&lookup)?
        };
        values[col.offset] = col.field_type.convert(value, &col.name.o)?;
    }
    Ok(())
}

/// Decode stored rows into per-offset values. Columns missing from a row
/// (added after it was written) read their original default.
pub fn decode_rows(table: &TableInfo, kvs: Vec<(Key, Value)>) -> Result<Vec<Row>> {
    let mut rows = Vec::with_capacity(kvs.len());
    for (key, value) in kvs {
        let handle = codec::decode_record_key(table.id, &key)?;
        let stored = decode_row(&value)?;
        let mut values: Vec<Datum> = table
            .columns
            .iter()
            .map(|c| {
                stored
                    .get(&c.id)
                    .cloned()
                    .or_else(|| c.origin_default.clone())
                    .unwrap_or(Datum::Null)
            })
            .collect();
        eval_generated(table, &mut values, true)?;
        rows.push(Row { handle, values });
    }
    Ok(rows)
}

pub fn scan_rows(txn: &mut Transaction, table: &TableInfo) -> Result<Vec<Row>> {
    let kvs = txn.scan_prefix(&codec::record_prefix(table.id));
    decode_rows(table, kvs)
}

fn index_values(index: &IndexInfo, values: &[Datum]) -> Vec<Datum> {
    index
        .columns
        .iter()
        .map(|ic| values.get(ic.offset).cloned().unwrap_or(Datum::Null))
        .collect()
}

fn duplicate_entry(table: &TableInfo, index_name: &str, values: &[Datum]) -> DdlError {
    let entry = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-");
    KvError::KeyExists {
        entry,
        key_name: format!("{}.{}", table.name.o, index_name),
    }
    .into()
}

fn index_entry(table: &TableInfo, index: &IndexInfo, values: &[Datum], handle: &Handle) -> (Key, bool) {
    let vals = index_values(index, values);
    let distinct = index.unique && !vals.iter().any(Datum::is_null);
    let key = if distinct {
        codec::index_key(table.id, index.id, &vals, None)
    } else {
        codec::index_key(table.id, index.id, &vals, Some(handle))
    };
    (key, distinct)
}

/// Index key and value for a row, rejecting a unique value owned by another row.
fn checked_index_entry(
    txn: &mut Transaction,
    table: &TableInfo,
    index: &IndexInfo,
    values: &[Datum],
    handle: &Handle,
) -> Result<(Key, Value)> {
    let (key, distinct) = index_entry(table, index, values, handle);
    if !distinct {
        return Ok((key, b"0".to_vec()));
    }
    if let Some(existing) = txn.get(&key) {
        if Handle::decode(&existing).as_ref() != Some(handle) {
            return Err(duplicate_entry(table, &index.name.o, &index_values(index, values)));
        }
    }
    Ok((key, handle.encode()))
}

/// Write one index entry; rewriting the entry a row already owns is a no-op.
pub fn put_index_entry(txn: &mut Transaction, table: &TableInfo, index: &IndexInfo, values: &[Datum], handle: &Handle) -> Result<()> {
    let (key, value) = checked_index_entry(txn, table, index, values, handle)?;
    txn.set(key, value);
    Ok(())
}

fn delete_index_entry(txn: &mut Transaction, table: &TableInfo, index: &IndexInfo, values: &[Datum], handle: &Handle) {
    let (key, distinct) = index_entry(table, index, values, handle);
    if distinct {
        match txn.get(&key) {
            Some(existing) if Handle::decode(&existing).as_ref() == Some(handle) => txn.delete(key),
            _ => {}
        }
    } else {
        txn.delete(key);
    }
}

fn default_value(col: &ColumnInfo) -> Result<Datum> {
    match &col.default_value {
        Some(DefaultValue::Literal(d)) => col.field_type.convert(d.clone(), &col.name.o),
        Some(DefaultValue::CurrentTimestamp { fsp }) => {
            let now = Utc::now();
            let text = if *fsp == 0 {
                now.format("%Y-%m-%d %H:%M:%S").to_string()
            } else {
                let frac = now.format("%f").to_string();
                format!("{}.{}", now.format("%Y-%m-%d %H:%M:%S"), &frac[..*fsp as usize])
            };
            Ok(Datum::String(text))
        }
        None if col.not_null => Err(TableError::NoDefaultForField(col.name.o.clone()).into()),
        None => Ok(Datum::Null),
    }
}

/// Insert one row. `columns` names the supplied values; empty means every
/// public, non-generated column in order.
pub fn add_record(
    txn: &mut Transaction,
    tbl: &TableHandle,
    columns: &[&str],
    supplied: Vec<Datum>,
    opts: WriteOptions,
) -> Result<Handle> {
    let table = tbl.meta.as_ref();
    let targets: Vec<&ColumnInfo> = if columns.is_empty() {
        table.public_columns().filter(|c| !c.is_generated()).collect()
    } else {
        columns
            .iter()
            .map(|name| {
                table
                    .find_column(name)
                    .filter(|c| c.state == SchemaState::Public && !c.hidden)
                    .ok_or_else(|| PlannerError::UnknownColumn(name.to_string()).into())
            })
            .collect::<Result<_>>()?
    };
    if targets.len() != supplied.len() {
        return Err(PlannerError::WrongValueCount(1).into());
    }

    let mut values = vec![Datum::Null; table.columns.len()];
    let mut provided = vec![false; table.columns.len()];
    for (col, value) in targets.iter().zip(supplied) {
        values[col.offset] = col.field_type.convert(value, &col.name.o)?;
        provided[col.offset] = true;
    }

    let auto_random_col = if table.contains_auto_random_bits() {
        table.pk_handle_column().map(|c| c.offset)
    } else {
        None
    };
    for col in table.columns.iter().filter(|c| c.state.is_writable()) {
        if col.is_generated() {
            continue;
        }
        let is_auto = col.auto_increment || Some(col.offset) == auto_random_col;
        if !provided[col.offset] {
            if is_auto {
                continue;
            }
            values[col.offset] = default_value(col)?;
        }
        if values[col.offset].is_null() && !is_auto && (col.not_null || col.prevent_null_insert) {
            return Err(TableError::BadNull(col.name.o.clone()).into());
        }
    }

    if let Some(col) = table.auto_increment_column() {
        fill_auto_increment(tbl, col, &mut values)?;
    }
    if let Some(offset) = auto_random_col {
        fill_auto_random(tbl, &table.columns[offset], &mut values, opts)?;
    }
    eval_generated(table, &mut values, false)?;

    let handle = if let Some(pk) = table.pk_handle_column() {
        let v = int_bits(&values[pk.offset]).ok_or_else(|| TableError::BadNull(pk.name.o.clone()))?;
        Handle::Int(v)
    } else if table.is_common_handle {
        let pk = table
            .primary_index()
            .ok_or_else(|| DdlError::Internal(format!("table {} has no clustered index", table.name)))?;
        Handle::Common(codec::encode_datums(&index_values(pk, &values)))
    } else {
        alloc_row_id(tbl)?
    };

    let record_key = codec::record_key(table.id, &handle);
    if txn.get(&record_key).is_some() {
        return Err(duplicate_entry(table, "PRIMARY", &[Datum::String(handle.to_string())]));
    }
    let stored: Vec<(i64, Datum)> = table
        .columns
        .iter()
        .filter(|c| c.state.is_writable() && !(c.is_generated() && !c.is_stored_generated()))
        .map(|c| (c.id, values[c.offset].clone()))
        .collect();
    let mut entries = Vec::new();
    for index in table.indices.iter().filter(|i| i.state.is_writable()) {
        if index.primary && (table.pk_is_handle || table.is_common_handle) {
            continue;
        }
        entries.push(checked_index_entry(txn, table, index, &values, &handle)?);
    }
    txn.set(record_key, encode_row(&stored)?);
    for (key, value) in entries {
        txn.set(key, value);
    }
    trace!(table_id = table.id, %handle, "record added");
    Ok(handle)
}

/// Integer value with unsigned datums reinterpreted bit for bit.
fn int_bits(value: &Datum) -> Option<i64> {
    match value {
        Datum::Uint(v) => Some(*v as i64),
        other => other.as_i64(),
    }
}

fn fill_auto_increment(tbl: &TableHandle, col: &ColumnInfo, values: &mut [Datum]) -> Result<()> {
    let alloc = tbl
        .allocator(AllocatorType::AutoIncrement)
        .ok_or(AutoIdError::AutoincReadFailed)?;
    match int_bits(&values[col.offset]) {
        Some(v) if v != 0 => {
            if v > 0 {
                alloc.rebase(v, true)?;
            }
        }
        _ => {
            let id = alloc.alloc_one()?;
            values[col.offset] = col.field_type.convert(Datum::Int(id), &col.name.o)?;
        }
    }
    Ok(())
}

fn fill_auto_random(tbl: &TableHandle, col: &ColumnInfo, values: &mut [Datum], opts: WriteOptions) -> Result<()> {
    let layout = auto_random_layout(&tbl.meta);
    match int_bits(&values[col.offset]) {
        Some(v) if v != 0 => {
            if !opts.allow_auto_random_explicit_insert {
                return Err(AutoIdError::explicit_insert_disabled().into());
            }
            // Signed negative values carry no usable incremental part.
            if v > 0 || col.field_type.unsigned {
                let alloc = tbl
                    .allocator(AllocatorType::AutoRandom)
                    .ok_or(AutoIdError::AutoRandReadFailed)?;
                alloc.rebase(layout.incremental_part(v), true)?;
            }
        }
        _ => {
            let alloc = tbl
                .allocator(AllocatorType::AutoRandom)
                .ok_or(AutoIdError::AutoRandReadFailed)?;
            let inc = alloc.alloc_one()?;
            let id = layout.compose(tbl.allocators.shard().next_shard(), inc);
            values[col.offset] = if col.field_type.unsigned {
                Datum::Uint(id as u64)
            } else {
                Datum::Int(id)
            };
        }
    }
    Ok(())
}

fn alloc_row_id(tbl: &TableHandle) -> Result<Handle> {
    let alloc = tbl
        .allocator(AllocatorType::RowId)
        .ok_or(AutoIdError::AutoincReadFailed)?;
    let id = alloc.alloc_one()?;
    let layout = ShardIdLayout::row_id(tbl.meta.shard_row_id_bits);
    Ok(Handle::Int(layout.compose(tbl.allocators.shard().next_shard(), id)))
}

/// Remove one row and every index entry still maintained for it.
pub fn remove_record(txn: &mut Transaction, table: &TableInfo, row: &Row) {
    txn.delete(codec::record_key(table.id, &row.handle));
    for index in table.indices.iter().filter(|i| i.state != SchemaState::None) {
        if index.primary && (table.pk_is_handle || table.is_common_handle) {
            continue;
        }
        delete_index_entry(txn, table, index, &row.values, &row.handle);
    }
}

/// Delete every row of the table; returns the number of rows removed.
pub fn remove_all(txn: &mut Transaction, table: &TableInfo) -> Result<usize> {
    let rows = scan_rows(txn, table)?;
    for row in &rows {
        remove_record(txn, table, row);
    }
    Ok(rows.len())
}

/// Delete all data keys (rows and indexes) of a table ID.
pub fn drop_table_data(txn: &mut Transaction, table_id: i64) -> usize {
    txn.delete_prefix(&codec::table_prefix(table_id))
}

/// Delete every entry of one index.
pub fn drop_index_data(txn: &mut Transaction, table_id: i64, index_id: i64) -> usize {
    txn.delete_prefix(&codec::index_prefix(table_id, index_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::autoid::{AllocatorOptions, Allocators};
    use crate::kv::{MemStore, StoreRef};
    use crate::model::{Expr, FieldType, GeneratedColumn, IndexColumn};

    fn column(id: i64, name: &str, offset: usize, ft: FieldType) -> ColumnInfo {
        ColumnInfo {
            id,
            name: name.into(),
            offset,
            field_type: ft,
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
        }
    }

    fn handle_for(store: &StoreRef, table: TableInfo) -> TableHandle {
        let opts = AllocatorOptions { step: 100, txn_retry_limit: 3 };
        TableHandle {
            allocators: Allocators::from_table_info(store, &table, opts),
            meta: Arc::new(table),
            db_id: 1,
        }
    }

    fn indexed_table() -> TableInfo {
        let mut t = TableInfo::new(10, "t");
        t.state = SchemaState::Public;
        t.columns.push(column(1, "a", 0, FieldType::int()));
        let mut b = column(2, "b", 1, FieldType::int());
        b.generated = Some(GeneratedColumn {
            expr: Expr::binary(crate::model::BinaryOp::Add, Expr::col("a"), Expr::lit(1i64)),
            stored: false,
        });
        t.columns.push(b);
        t.indices.push(IndexInfo {
            id: 1,
            name: "ua".into(),
            columns: vec![IndexColumn { name: "a".into(), offset: 0, length: None }],
            unique: true,
            primary: false,
            state: SchemaState::Public,
            comment: String::new(),
        });
        t
    }

    #[test]
    fn test_insert_scan_and_unique_violation() {
        let store = MemStore::new_ref();
        let tbl = handle_for(&store, indexed_table());
        let mut txn = Transaction::begin(store.clone());
        let h1 = add_record(&mut txn, &tbl, &[], vec![Datum::Int(5)], WriteOptions::default()).unwrap();
        add_record(&mut txn, &tbl, &["a"], vec![Datum::Int(6)], WriteOptions::default()).unwrap();
        let err = add_record(&mut txn, &tbl, &[], vec![Datum::Int(5)], WriteOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "[kv:1062]Duplicate entry '5' for key 't.ua'");
        txn.commit().unwrap();

        let mut txn = Transaction::begin(store.clone());
        let rows = scan_rows(&mut txn, &tbl.meta).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].handle, h1);
        assert_eq!(rows[0].values, vec![Datum::Int(5), Datum::Int(6)]);
        assert_eq!(remove_all(&mut txn, &tbl.meta).unwrap(), 2);
        assert!(txn.scan_prefix(&codec::table_prefix(10)).is_empty());
    }

    #[test]
    fn test_missing_column_reads_origin_default() {
        let store = MemStore::new_ref();
        let mut t = TableInfo::new(11, "t");
        t.state = SchemaState::Public;
        t.columns.push(column(1, "a", 0, FieldType::int()));
        let tbl = handle_for(&store, t.clone());
        let mut txn = Transaction::begin(store.clone());
        add_record(&mut txn, &tbl, &[], vec![Datum::Int(1)], WriteOptions::default()).unwrap();

        let mut c = column(2, "c", 1, FieldType::int());
        c.origin_default = Some(Datum::Int(7));
        t.columns.push(c);
        let rows = scan_rows(&mut txn, &t).unwrap();
        assert_eq!(rows[0].values, vec![Datum::Int(1), Datum::Int(7)]);
    }

    #[test]
    fn test_not_null_without_default() {
        let store = MemStore::new_ref();
        let mut t = TableInfo::new(12, "t");
        t.state = SchemaState::Public;
        t.columns.push(column(1, "a", 0, FieldType::int()));
        let mut b = column(2, "b", 1, FieldType::int());
        b.not_null = true;
        t.columns.push(b);
        let tbl = handle_for(&store, t);
        let mut txn = Transaction::begin(store.clone());
        let err = add_record(&mut txn, &tbl, &["a"], vec![Datum::Int(1)], WriteOptions::default()).unwrap_err();
        assert_eq!(err.code(), 1364);
        let err = add_record(&mut txn, &tbl, &[], vec![Datum::Int(1), Datum::Null], WriteOptions::default()).unwrap_err();
        assert_eq!(err.code(), 1048);
    }

    #[test]
    fn test_prevent_null_insert_rejects_explicit_and_implicit_null() {
        let store = MemStore::new_ref();
        let mut t = TableInfo::new(13, "t");
        t.state = SchemaState::Public;
        t.columns.push(column(1, "a", 0, FieldType::int()));
        let mut b = column(2, "b", 1, FieldType::int());
        b.prevent_null_insert = true;
        t.columns.push(b);
        let tbl = handle_for(&store, t);
        let mut txn = Transaction::begin(store.clone());
        let err = add_record(&mut txn, &tbl, &["a"], vec![Datum::Int(1)], WriteOptions::default()).unwrap_err();
        assert_eq!(err.code(), 1048);
        let err = add_record(&mut txn, &tbl, &[], vec![Datum::Int(1), Datum::Null], WriteOptions::default()).unwrap_err();
        assert_eq!(err.code(), 1048);
        add_record(&mut txn, &tbl, &[], vec![Datum::Int(1), Datum::Int(2)], WriteOptions::default()).unwrap();
    }
}
