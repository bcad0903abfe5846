//! Statement execution: resolve names against the caller's InfoSchema, build
//! the job arguments, and submit the job.
//!
//! Everything that can be decided from the snapshot is checked here so that
//! obviously invalid statements never reach the queue. Handlers repeat the
//! checks that depend on the state at commit time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::charset::{CHARSET_BIN, COLLATION_BIN, resolve_charset_collation};
use crate::ddl::Ddl;
use crate::ddl::stmt::{
    AlterDatabaseOption, AlterTableSpec, ColumnDef, CreateDatabaseStmt, CreatePolicyStmt, CreateSequenceStmt,
    CreateTableStmt, CreateViewStmt, DropKind, IndexDef, IndexPart, TableName,
};
use crate::ddl::validate::{
    check_default_value, check_expression_index, check_generated_columns, check_identifier, check_sequence,
    infer_expr_type,
};
use crate::errors::{
    AutoIdError, DdlError, PlacementError, PlannerError, Result, SchemaError, SqlWarning, ValidationError,
};
use crate::infoschema::{InfoSchema, TableHandle};
use crate::model::{
    AUTO_RANDOM_RANGE_BITS_DEFAULT, ActionType, CIStr, ColumnInfo, ColumnPosition, ColumnType, DatabaseInfo,
    Datum, DefaultValue, FieldType, GeneratedColumn, IndexColumn, IndexInfo, Job, JobArgs, PartitionDefinition,
    PartitionInfo, PlacementSettings, PolicyInfo, PolicyRefInfo, RenameEntry, SchemaState, TableInfo, TableKind,
    TableRef, TypeClass, ViewInfo,
};
use crate::placement::check_policy_not_in_use_from_info_schema;

pub const SYSTEM_SCHEMA: &str = "mysql";
pub const MAX_SHARD_ROW_ID_BITS: u64 = 15;
const MAX_AUTO_RANDOM_SHARD_BITS: u64 = 15;
const MIN_AUTO_RANDOM_RANGE_BITS: u64 = 32;

/// The session state a statement executes under.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub is: Arc<InfoSchema>,
    pub current_db: Option<String>,
    pub charset_server: String,
    pub collation_server: String,
    pub enable_auto_increment_in_generated: bool,
}

impl ExecContext {
    pub fn new(is: Arc<InfoSchema>) -> Self {
        Self {
            is,
            current_db: None,
            charset_server: "utf8mb4".to_string(),
            collation_server: "utf8mb4_bin".to_string(),
            enable_auto_increment_in_generated: false,
        }
    }

    fn schema_of(&self, name: &TableName) -> Result<String> {
        name.schema
            .clone()
            .or_else(|| self.current_db.clone())
            .ok_or_else(|| PlannerError::NoDb.into())
    }

    fn database(&self, name: &str) -> Result<Arc<DatabaseInfo>> {
        self.is.schema_by_name(name).ok_or_else(|| {
            SchemaError::DatabaseNotExists {
                name: name.to_string(),
            }
            .into()
        })
    }

    fn policy_ref(&self, name: &str) -> Result<PolicyRefInfo> {
        let policy = self
            .is
            .policy_by_name(name)
            .ok_or_else(|| PlacementError::PolicyNotExists(name.to_string()))?;
        Ok(PolicyRefInfo {
            id: policy.id,
            name: policy.name.clone(),
        })
    }

    fn optional_policy_ref(&self, name: Option<&str>) -> Result<Option<PolicyRefInfo>> {
        name.map(|n| self.policy_ref(n)).transpose()
    }
}

/// Turn an "already exists" / "does not exist" failure into a note when the
/// statement said `IF [NOT] EXISTS`.
fn tolerate(result: Result<Job>, tolerated: bool, codes: &[u16]) -> Result<Vec<SqlWarning>> {
    match result {
        Ok(_) => Ok(Vec::new()),
        Err(e) if tolerated && codes.contains(&e.code()) => Ok(vec![SqlWarning::note(&e)]),
        Err(e) => Err(e),
    }
}

fn current_timestamp_text() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Column metadata for a definition, with its charset resolved against the table's.
fn build_column(def: &ColumnDef, table_charset: (&str, &str)) -> Result<ColumnInfo> {
    check_identifier(&def.name)?;
    let mut field_type = def.field_type.clone();
    if field_type.tp.has_charset() {
        let (charset, collate) = resolve_charset_collation(def.charset.as_deref(), &def.collations, table_charset)?;
        field_type.charset = charset;
        field_type.collate = collate;
    } else {
        field_type.charset = CHARSET_BIN.to_string();
        field_type.collate = COLLATION_BIN.to_string();
    }
    let col = ColumnInfo {
        id: 0,
        name: CIStr::new(def.name.as_str()),
        offset: 0,
        field_type,
        default_value: def.default.clone(),
        origin_default: None,
        generated: def.generated.as_ref().map(|g| GeneratedColumn {
            expr: g.expr.clone(),
            stored: g.stored,
        }),
        not_null: def.not_null || def.primary_key,
        prevent_null_insert: false,
        auto_increment: def.auto_increment,
        primary_key: false,
        hidden: false,
        state: SchemaState::None,
        comment: def.comment.clone(),
    };
    check_default_value(&col)?;
    Ok(col)
}

/// Value rows written before an added column existed read for it.
fn origin_default(col: &ColumnInfo) -> Result<Option<Datum>> {
    if col.is_generated() {
        return Ok(None);
    }
    let value = match &col.default_value {
        Some(DefaultValue::Literal(d)) => col.field_type.convert(d.clone(), &col.name.o)?,
        Some(DefaultValue::CurrentTimestamp { .. }) => Datum::String(current_timestamp_text()),
        None if col.not_null => col.field_type.zero_value(),
        None => Datum::Null,
    };
    Ok(Some(value))
}

/// Index metadata plus the hidden columns backing expression parts. Column
/// offsets are resolved against `table` when it already has the columns.
fn build_index(table: &TableInfo, def: &IndexDef, name: &str) -> Result<(IndexInfo, Vec<ColumnInfo>)> {
    check_identifier(name)?;
    let mut columns = Vec::with_capacity(def.parts.len());
    let mut hidden = Vec::new();
    for (i, part) in def.parts.iter().enumerate() {
        match part {
            IndexPart::Column { name: col_name, length } => {
                let col = table.find_column(col_name).filter(|c| !c.hidden).ok_or_else(|| {
                    SchemaError::ColumnNotExists {
                        column: col_name.clone(),
                        table: table.name.o.clone(),
                    }
                })?;
                columns.push(IndexColumn {
                    name: col.name.clone(),
                    offset: col.offset,
                    length: *length,
                });
            }
            IndexPart::Expr(expr) => {
                check_expression_index(table, name, expr)?;
                let col_name = CIStr::new(format!("_V$_{}_{}", name, i));
                hidden.push(ColumnInfo {
                    id: 0,
                    name: col_name.clone(),
                    offset: 0,
                    field_type: infer_expr_type(table, expr),
                    default_value: None,
                    origin_default: None,
                    generated: Some(GeneratedColumn {
                        expr: expr.clone(),
                        stored: false,
                    }),
                    not_null: false,
                    prevent_null_insert: false,
                    auto_increment: false,
                    primary_key: false,
                    hidden: true,
                    state: SchemaState::None,
                    comment: String::new(),
                });
                columns.push(IndexColumn {
                    name: col_name,
                    offset: 0,
                    length: None,
                });
            }
        }
    }
    let index = IndexInfo {
        id: 0,
        name: CIStr::new(name),
        columns,
        unique: def.unique || def.primary,
        primary: def.primary,
        state: SchemaState::None,
        comment: String::new(),
    };
    Ok((index, hidden))
}

/// Name for an index declared without one: its first column, deduplicated.
fn default_index_name(table: &TableInfo, def: &IndexDef) -> String {
    if def.primary {
        return "PRIMARY".to_string();
    }
    let base = match def.parts.first() {
        Some(IndexPart::Column { name, .. }) => name.clone(),
        _ => "expression_index".to_string(),
    };
    if table.find_index(&base).is_none() {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if table.find_index(&candidate).is_none() {
            return candidate;
        }
        n += 1;
    }
}

/// Widening changes only: same type family, no lost precision or length.
fn check_modify_compatible(old: &FieldType, new: &FieldType) -> Result<()> {
    let unsupported = |msg: String| -> Result<()> { Err(ValidationError::UnsupportedModifyColumn(msg).into()) };
    if old.tp.class() != new.tp.class() || (old.tp.class() == TypeClass::Other && old.tp != new.tp) {
        return unsupported(format!("type {} not match origin {}", new, old));
    }
    match old.tp.class() {
        TypeClass::Integer => {
            let (old_bits, new_bits) = (old.tp.integer_bits().unwrap_or(64), new.tp.integer_bits().unwrap_or(64));
            if new_bits < old_bits || old.unsigned != new.unsigned {
                return unsupported(format!("length {} is less than origin {}", new, old));
            }
        }
        TypeClass::String | TypeClass::Binary => {
            if new.flen.unwrap_or(u32::MAX) < old.flen.unwrap_or(u32::MAX) {
                return unsupported(format!("length {} is less than origin {}", new, old));
            }
            if !new.charset.is_empty() && new.charset != old.charset {
                return unsupported(format!("can't change charset from {} to {}", old.charset, new.charset));
            }
        }
        TypeClass::Temporal | TypeClass::Real => {
            if old.tp != new.tp || new.fsp() < old.fsp() {
                return unsupported(format!("type {} not match origin {}", new, old));
            }
        }
        TypeClass::Other => {}
    }
    Ok(())
}

/// Column order after moving `from` to `pos`, for generated-column checks.
fn reordered(columns: &[ColumnInfo], from: usize, pos: &ColumnPosition) -> Vec<ColumnInfo> {
    let mut out = columns.to_vec();
    let target = match pos {
        ColumnPosition::None => return out,
        ColumnPosition::First => 0,
        ColumnPosition::After(name) => match out.iter().position(|c| c.name.l == name.l) {
            Some(after) if after < from => after + 1,
            Some(after) => after,
            None => return out,
        },
    };
    let col = out.remove(from);
    out.insert(target, col);
    out
}

fn auto_random_error(msg: &str) -> DdlError {
    AutoIdError::InvalidAutoRandom(msg.to_string()).into()
}

fn check_auto_random(table: &mut TableInfo, def: &ColumnDef, shard_bits: u64, range_bits: Option<u64>) -> Result<()> {
    if def.auto_increment {
        return Err(auto_random_error("auto_random is incompatible with auto_increment"));
    }
    if def.default.is_some() {
        return Err(auto_random_error("auto_random is incompatible with default value"));
    }
    let is_handle = table
        .pk_handle_column()
        .is_some_and(|c| c.name.l == def.name.to_lowercase());
    if !is_handle || def.field_type.tp != ColumnType::BigInt {
        return Err(auto_random_error(&format!(
            "auto_random is only supported on the bigint primary key column, but column '{}' is not",
            def.name
        )));
    }
    if shard_bits == 0 || shard_bits > MAX_AUTO_RANDOM_SHARD_BITS {
        return Err(auto_random_error(&format!(
            "auto_random shard bits must be in [1, {}], got {}",
            MAX_AUTO_RANDOM_SHARD_BITS, shard_bits
        )));
    }
    let range_bits = range_bits.unwrap_or(AUTO_RANDOM_RANGE_BITS_DEFAULT);
    if !(MIN_AUTO_RANDOM_RANGE_BITS..=AUTO_RANDOM_RANGE_BITS_DEFAULT).contains(&range_bits) {
        return Err(auto_random_error(&format!(
            "auto_random range bits must be in [{}, {}], got {}",
            MIN_AUTO_RANDOM_RANGE_BITS, AUTO_RANDOM_RANGE_BITS_DEFAULT, range_bits
        )));
    }
    table.auto_random_bits = shard_bits;
    table.auto_random_range_bits = range_bits;
    Ok(())
}

impl Ddl {
    async fn submit(&self, job: Job) -> Result<Job> {
        debug!(tp = %job.tp, schema = %job.schema_name, table = %job.table_name, "submitting DDL job");
        self.do_ddl_job(job).await
    }

    fn new_id(&self) -> Result<i64> {
        self.gen_global_ids(1)?
            .pop()
            .ok_or_else(|| DdlError::Internal("no global id allocated".to_string()))
    }

    fn lookup_table(&self, ctx: &ExecContext, name: &TableName) -> Result<(String, Arc<TableHandle>)> {
        let schema = ctx.schema_of(name)?;
        let table = ctx.is.table_by_name(&schema, &name.name)?;
        Ok((schema, table))
    }

    pub async fn create_database(&self, ctx: &ExecContext, stmt: &CreateDatabaseStmt) -> Result<Vec<SqlWarning>> {
        check_identifier(&stmt.name)?;
        if ctx.is.schema_exists(&stmt.name) {
            let err: DdlError = SchemaError::DatabaseExists {
                name: stmt.name.clone(),
            }
            .into();
            return if stmt.if_not_exists {
                Ok(vec![SqlWarning::note(&err)])
            } else {
                Err(err)
            };
        }
        let collations: Vec<String> = stmt.collate.iter().cloned().collect();
        let (charset, collate) = resolve_charset_collation(
            stmt.charset.as_deref(),
            &collations,
            (&ctx.charset_server, &ctx.collation_server),
        )?;
        let id = self.new_id()?;
        let mut db = DatabaseInfo::new(id, &stmt.name, &charset, &collate);
        db.placement_policy_ref = ctx.optional_policy_ref(stmt.placement_policy.as_deref())?;
        let job = Job::new(ActionType::CreateSchema, id, 0, JobArgs::CreateSchema { db })
            .with_names(&stmt.name, "")
            .with_query(format!("CREATE DATABASE `{}`", stmt.name));
        tolerate(self.submit(job).await, stmt.if_not_exists, &[1007])
    }

    pub async fn drop_database(&self, ctx: &ExecContext, name: &str, if_exists: bool) -> Result<Vec<SqlWarning>> {
        if name.eq_ignore_ascii_case(SYSTEM_SCHEMA) {
            return Err(ValidationError::ForbiddenDropSystemDatabase(name.to_string()).into());
        }
        let Some(db) = ctx.is.schema_by_name(name) else {
            let err: DdlError = SchemaError::DatabaseDropNotExists { name: name.to_string() }.into();
            return if if_exists { Ok(vec![SqlWarning::note(&err)]) } else { Err(err) };
        };
        let job = Job::new(ActionType::DropSchema, db.id, 0, JobArgs::None)
            .with_names(&db.name.o, "")
            .with_query(format!("DROP DATABASE `{}`", db.name));
        tolerate(self.submit(job).await, if_exists, &[1008])
    }

    pub async fn alter_database(&self, ctx: &ExecContext, name: &str, option: &AlterDatabaseOption) -> Result<()> {
        let db = ctx.database(name)?;
        let (tp, args) = match option {
            AlterDatabaseOption::Charset { charset, collate } => {
                let collations: Vec<String> = collate.iter().cloned().collect();
                let (charset, collate) =
                    resolve_charset_collation(charset.as_deref(), &collations, (&db.charset, &db.collate))?;
                (
                    ActionType::ModifySchemaCharsetAndCollate,
                    JobArgs::ModifySchemaCharset { charset, collate },
                )
            }
            AlterDatabaseOption::PlacementPolicy(policy) => (
                ActionType::ModifySchemaDefaultPlacement,
                JobArgs::ModifySchemaPlacement {
                    policy_ref: ctx.optional_policy_ref(policy.as_deref())?,
                },
            ),
        };
        let job = Job::new(tp, db.id, 0, args)
            .with_names(&db.name.o, "")
            .with_query(format!("ALTER DATABASE `{}`", db.name));
        self.submit(job).await.map(|_| ())
    }

    pub async fn create_table(&self, ctx: &ExecContext, stmt: &CreateTableStmt) -> Result<Vec<SqlWarning>> {
        let schema = ctx.schema_of(&stmt.table)?;
        let db = ctx.database(&schema)?;
        check_identifier(&stmt.table.name)?;
        if ctx.is.table_exists(&schema, &stmt.table.name) {
            let err: DdlError = SchemaError::TableExists {
                schema: db.name.o.clone(),
                table: stmt.table.name.clone(),
            }
            .into();
            return if stmt.if_not_exists { Ok(vec![SqlWarning::note(&err)]) } else { Err(err) };
        }
        let table = self.build_table_info(ctx, &db, stmt)?;
        let job = Job::new(ActionType::CreateTable, db.id, table.id, JobArgs::CreateTable { table })
            .with_names(&db.name.o, &stmt.table.name)
            .with_query(format!("CREATE TABLE `{}`.`{}`", db.name, stmt.table.name));
        tolerate(self.submit(job).await, stmt.if_not_exists, &[1050])
    }

    fn build_table_info(&self, ctx: &ExecContext, db: &DatabaseInfo, stmt: &CreateTableStmt) -> Result<TableInfo> {
        let collations: Vec<String> = stmt.options.collate.iter().cloned().collect();
        let (charset, collate) =
            resolve_charset_collation(stmt.options.charset.as_deref(), &collations, (&db.charset, &db.collate))?;
        let partitions = stmt.partition.as_ref().map_or(0, |p| p.definitions.len());
        let mut ids = self.gen_global_ids(1 + partitions)?.into_iter();
        let table_id = ids
            .next()
            .ok_or_else(|| DdlError::Internal("no global id allocated".to_string()))?;

        let mut table = TableInfo::new(table_id, &stmt.table.name);
        table.charset = charset;
        table.collate = collate;
        if let Some(comment) = &stmt.options.comment {
            table.comment = comment.clone();
        }

        for def in &stmt.columns {
            if table.find_column(&def.name).is_some() {
                return Err(SchemaError::ColumnExists(def.name.clone()).into());
            }
            let mut col = build_column(def, (&table.charset, &table.collate))?;
            table.max_column_id += 1;
            col.id = table.max_column_id;
            col.offset = table.columns.len();
            col.state = SchemaState::Public;
            table.columns.push(col);
        }

        // Primary key: column-level or table-level, but only one.
        let mut index_defs: Vec<IndexDef> = Vec::new();
        let column_pks: Vec<&ColumnDef> = stmt.columns.iter().filter(|c| c.primary_key).collect();
        let table_pks = stmt.indexes.iter().filter(|i| i.primary).count();
        if column_pks.len() + table_pks > 1 {
            return Err(ValidationError::MultiplePriKey.into());
        }
        if let Some(def) = column_pks.first() {
            index_defs.push(IndexDef::new("PRIMARY", vec![IndexPart::column(&def.name)]).primary());
        }
        index_defs.extend(stmt.indexes.iter().cloned());
        for def in stmt.columns.iter().filter(|c| c.unique && !c.primary_key) {
            index_defs.push(IndexDef::new(&def.name, vec![IndexPart::column(&def.name)]).unique());
        }

        for def in &index_defs {
            if def.primary {
                let pk_cols: Vec<String> = def
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        IndexPart::Column { name, .. } => Some(name.to_lowercase()),
                        IndexPart::Expr(_) => None,
                    })
                    .collect();
                for col in table.columns.iter_mut().filter(|c| pk_cols.contains(&c.name.l)) {
                    col.primary_key = true;
                    col.not_null = true;
                }
                let single_int = def.parts.len() == 1
                    && pk_cols.len() == 1
                    && table
                        .find_column(&pk_cols[0])
                        .is_some_and(|c| c.field_type.tp.is_integer());
                if single_int && stmt.clustered != Some(false) {
                    table.pk_is_handle = true;
                    continue;
                }
                table.is_common_handle = stmt.clustered == Some(true);
            }
            let name = match &def.name {
                Some(name) if !def.primary => name.clone(),
                _ => default_index_name(&table, def),
            };
            if table.find_index(&name).is_some() {
                return Err(SchemaError::IndexExists(name).into());
            }
            let (mut index, hidden) = build_index(&table, def, &name)?;
            for mut col in hidden {
                table.max_column_id += 1;
                col.id = table.max_column_id;
                col.offset = table.columns.len();
                col.state = SchemaState::Public;
                table.columns.push(col);
            }
            table.reset_offsets();
            for ic in &mut index.columns {
                if let Some(col) = table.find_column(&ic.name.l) {
                    ic.offset = col.offset;
                }
            }
            table.max_index_id += 1;
            index.id = table.max_index_id;
            index.state = SchemaState::Public;
            table.indices.push(index);
        }

        for def in &stmt.columns {
            if let Some((shard_bits, range_bits)) = def.auto_random {
                check_auto_random(&mut table, def, shard_bits, range_bits)?;
            }
        }
        check_generated_columns(&table.columns, ctx.enable_auto_increment_in_generated)?;

        let opts = &stmt.options;
        if let Some(v) = opts.auto_increment {
            table.auto_inc_id = v;
        }
        if let Some(v) = opts.auto_random_base {
            if !table.contains_auto_random_bits() {
                return Err(AutoIdError::rebase_not_applicable().into());
            }
            table.auto_rand_id = v;
        }
        if let Some(bits) = opts.shard_row_id_bits {
            if bits > 0 && table.pk_is_handle {
                return Err(ValidationError::UnsupportedShardRowIdBits.into());
            }
            let bits = bits.min(MAX_SHARD_ROW_ID_BITS);
            table.shard_row_id_bits = bits;
            table.max_shard_row_id_bits = bits;
        }
        if let Some(cache) = opts.auto_id_cache {
            if cache < 1 {
                return Err(ValidationError::UnsupportedDdlOperation(format!("auto_id_cache = {}", cache)).into());
            }
            table.auto_id_cache = cache;
        }
        table.placement_policy_ref = ctx.optional_policy_ref(opts.placement_policy.as_deref())?;

        if let Some(spec) = &stmt.partition {
            let mut definitions = Vec::with_capacity(spec.definitions.len());
            for def in &spec.definitions {
                check_identifier(&def.name)?;
                let id = ids
                    .next()
                    .ok_or_else(|| DdlError::Internal("no global id allocated".to_string()))?;
                definitions.push(PartitionDefinition {
                    id,
                    name: CIStr::new(def.name.as_str()),
                    less_than: def.less_than.clone(),
                    in_values: def.in_values.clone(),
                    placement_policy_ref: ctx.optional_policy_ref(def.placement_policy.as_deref())?,
                });
            }
            table.partition = Some(PartitionInfo {
                tp: spec.tp,
                expr: spec.expr.clone(),
                definitions,
            });
        }
        Ok(table)
    }

    pub async fn create_view(&self, ctx: &ExecContext, stmt: &CreateViewStmt) -> Result<()> {
        let schema = ctx.schema_of(&stmt.view)?;
        let db = ctx.database(&schema)?;
        check_identifier(&stmt.view.name)?;
        if !stmt.columns.is_empty() && stmt.columns.len() != stmt.select_fields.len() {
            return Err(ValidationError::ViewWrongList.into());
        }
        let mut old_view_id = 0;
        if let Ok(existing) = ctx.is.table_by_name(&schema, &stmt.view.name) {
            if !stmt.or_replace {
                return Err(SchemaError::TableExists {
                    schema: db.name.o.clone(),
                    table: stmt.view.name.clone(),
                }
                .into());
            }
            if !existing.meta.is_view() {
                return Err(ValidationError::WrongObject {
                    schema: db.name.o.clone(),
                    name: stmt.view.name.clone(),
                    kind: "VIEW".to_string(),
                }
                .into());
            }
            old_view_id = existing.meta.id;
        }

        let names: &[String] = if stmt.columns.is_empty() { &stmt.select_fields } else { &stmt.columns };
        let references = stmt
            .references
            .iter()
            .map(|r| {
                Ok(TableRef {
                    schema: CIStr::new(ctx.schema_of(r)?),
                    name: CIStr::new(r.name.as_str()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let id = if old_view_id != 0 { old_view_id } else { self.new_id()? };
        let mut view = TableInfo::new(id, &stmt.view.name);
        view.charset = db.charset.clone();
        view.collate = db.collate.clone();
        for (offset, name) in names.iter().enumerate() {
            check_identifier(name)?;
            let mut field_type = FieldType::new(ColumnType::VarChar);
            field_type.charset = db.charset.clone();
            field_type.collate = db.collate.clone();
            view.columns.push(ColumnInfo {
                id: offset as i64 + 1,
                name: CIStr::new(name.as_str()),
                offset,
                field_type,
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
        }
        view.max_column_id = view.columns.len() as i64;
        view.kind = TableKind::View(ViewInfo {
            algorithm: "UNDEFINED".to_string(),
            definer: "root@%".to_string(),
            security: "DEFINER".to_string(),
            select_sql: stmt.select_sql.clone(),
            columns: names.iter().map(|n| CIStr::new(n.as_str())).collect(),
            references,
        });

        let job = Job::new(
            ActionType::CreateView,
            db.id,
            id,
            JobArgs::CreateView {
                view,
                or_replace: stmt.or_replace,
                old_view_id,
            },
        )
        .with_names(&db.name.o, &stmt.view.name)
        .with_query(format!("CREATE VIEW `{}`.`{}` AS {}", db.name, stmt.view.name, stmt.select_sql));
        self.submit(job).await.map(|_| ())
    }

    pub async fn create_sequence(&self, ctx: &ExecContext, stmt: &CreateSequenceStmt) -> Result<Vec<SqlWarning>> {
        let schema = ctx.schema_of(&stmt.name)?;
        let db = ctx.database(&schema)?;
        check_identifier(&stmt.name.name)?;
        check_sequence(&db.name.o, &stmt.name.name, &stmt.options)?;
        if ctx.is.table_exists(&schema, &stmt.name.name) {
            let err: DdlError = SchemaError::TableExists {
                schema: db.name.o.clone(),
                table: stmt.name.name.clone(),
            }
            .into();
            return if stmt.if_not_exists { Ok(vec![SqlWarning::note(&err)]) } else { Err(err) };
        }
        let id = self.new_id()?;
        let mut table = TableInfo::new(id, &stmt.name.name);
        table.charset = db.charset.clone();
        table.collate = db.collate.clone();
        table.kind = TableKind::Sequence(stmt.options.clone());
        let job = Job::new(ActionType::CreateSequence, db.id, id, JobArgs::CreateTable { table })
            .with_names(&db.name.o, &stmt.name.name)
            .with_query(format!("CREATE SEQUENCE `{}`.`{}`", db.name, stmt.name.name));
        tolerate(self.submit(job).await, stmt.if_not_exists, &[1050])
    }

    /// `DROP TABLE|VIEW|SEQUENCE [IF EXISTS] a, b, ...`. Objects are dropped
    /// one job each; missing ones are reported after the rest are gone.
    pub async fn drop_tables(
        &self,
        ctx: &ExecContext,
        names: &[TableName],
        if_exists: bool,
        kind: DropKind,
    ) -> Result<Vec<SqlWarning>> {
        let mut targets = Vec::with_capacity(names.len());
        let mut warnings = Vec::new();
        let mut missing: Option<DdlError> = None;
        for name in names {
            let schema = ctx.schema_of(name)?;
            if schema.eq_ignore_ascii_case(SYSTEM_SCHEMA) {
                return Err(ValidationError::ForbiddenDropSystemTable {
                    schema,
                    table: name.name.clone(),
                }
                .into());
            }
            let unknown: DdlError = SchemaError::UnknownTable {
                schema: schema.clone(),
                table: name.name.clone(),
            }
            .into();
            let Ok(table) = ctx.is.table_by_name(&schema, &name.name) else {
                if if_exists {
                    warnings.push(SqlWarning::note(&unknown));
                } else if missing.is_none() {
                    missing = Some(unknown);
                }
                continue;
            };
            let wrong_object = |kind: &str| -> DdlError {
                ValidationError::WrongObject {
                    schema: schema.clone(),
                    name: name.name.clone(),
                    kind: kind.to_string(),
                }
                .into()
            };
            let tp = match kind {
                DropKind::Table if !table.meta.is_base_table() => return Err(unknown),
                DropKind::Table => ActionType::DropTable,
                DropKind::View if !table.meta.is_view() => return Err(wrong_object("VIEW")),
                DropKind::View => ActionType::DropView,
                DropKind::Sequence if !table.meta.is_sequence() => return Err(wrong_object("SEQUENCE")),
                DropKind::Sequence => ActionType::DropSequence,
            };
            targets.push((tp, schema, table));
        }

        for (tp, schema, table) in targets {
            let job = Job::new(tp, table.db_id, table.meta.id, JobArgs::None)
                .with_names(&schema, &table.meta.name.o)
                .with_query(format!("{} `{}`.`{}`", tp, schema, table.meta.name));
            warnings.extend(tolerate(self.submit(job).await, if_exists, &[1051])?);
        }
        match missing {
            Some(err) => Err(err),
            None => Ok(warnings),
        }
    }

    pub async fn truncate_table(&self, ctx: &ExecContext, name: &TableName) -> Result<()> {
        let (schema, table) = self.lookup_table(ctx, name)?;
        if !table.meta.is_base_table() {
            return Err(SchemaError::TableNotExists {
                schema,
                table: name.name.clone(),
            }
            .into());
        }
        let new_table_id = self.new_id()?;
        let job = Job::new(
            ActionType::TruncateTable,
            table.db_id,
            table.meta.id,
            JobArgs::TruncateTable { new_table_id },
        )
        .with_names(&schema, &table.meta.name.o)
        .with_query(format!("TRUNCATE TABLE `{}`.`{}`", schema, table.meta.name));
        self.submit(job).await.map(|_| ())
    }

    /// `RENAME TABLE a TO b, c TO d, ...`. Pairs resolve in order, so later
    /// pairs see the names earlier ones vacated or took.
    pub async fn rename_tables(&self, ctx: &ExecContext, pairs: &[(TableName, TableName)]) -> Result<()> {
        // (schema, table) -> table id, or None once renamed away.
        let mut overlay: HashMap<(String, String), Option<(i64, i64)>> = HashMap::new();
        let mut entries = Vec::with_capacity(pairs.len());
        for (from, to) in pairs {
            let old_schema = ctx.schema_of(from)?;
            let new_schema = ctx.schema_of(to)?;
            check_identifier(&to.name)?;
            let old_key = (old_schema.to_lowercase(), from.name.to_lowercase());
            let resolved = match overlay.get(&old_key) {
                Some(entry) => *entry,
                None => ctx
                    .is
                    .table_by_name(&old_schema, &from.name)
                    .ok()
                    .map(|t| (t.db_id, t.meta.id)),
            };
            let (old_schema_id, table_id) = resolved.ok_or_else(|| SchemaError::TableNotExists {
                schema: old_schema.clone(),
                table: from.name.clone(),
            })?;
            let new_db = ctx.database(&new_schema)?;
            let new_key = (new_schema.to_lowercase(), to.name.to_lowercase());
            let taken = match overlay.get(&new_key) {
                Some(entry) => entry.is_some(),
                None => ctx.is.table_exists(&new_schema, &to.name),
            };
            if taken {
                return Err(SchemaError::TableExists {
                    schema: new_db.name.o.clone(),
                    table: to.name.clone(),
                }
                .into());
            }
            overlay.insert(old_key, None);
            overlay.insert(new_key, Some((new_db.id, table_id)));
            entries.push(RenameEntry {
                table_id,
                old_schema_id,
                old_schema_name: CIStr::new(old_schema.as_str()),
                old_table_name: CIStr::new(from.name.as_str()),
                new_schema_id: new_db.id,
                new_table_name: CIStr::new(to.name.as_str()),
            });
        }
        let Some(first) = entries.first().cloned() else {
            return Ok(());
        };
        let tp = if entries.len() == 1 { ActionType::RenameTable } else { ActionType::RenameTables };
        let query = pairs
            .iter()
            .map(|(a, b)| format!("{} TO {}", a.name, b.name))
            .collect::<Vec<_>>()
            .join(", ");
        let job = Job::new(tp, first.old_schema_id, first.table_id, JobArgs::RenameTables { entries })
            .with_names(&first.old_schema_name.o, &first.old_table_name.o)
            .with_query(format!("RENAME TABLE {}", query));
        self.submit(job).await.map(|_| ())
    }

    /// One `ALTER TABLE` clause.
    pub async fn alter_table(&self, ctx: &ExecContext, name: &TableName, spec: &AlterTableSpec) -> Result<Vec<SqlWarning>> {
        let (schema, handle) = self.lookup_table(ctx, name)?;
        let table = handle.meta.as_ref();
        if !table.is_base_table() {
            return Err(ValidationError::WrongObject {
                schema,
                name: name.name.clone(),
                kind: "BASE TABLE".to_string(),
            }
            .into());
        }
        let mut warnings = Vec::new();
        let job = |tp: ActionType, args: JobArgs| {
            Job::new(tp, handle.db_id, table.id, args)
                .with_names(&schema, &table.name.o)
                .with_query(format!("ALTER TABLE `{}`.`{}` {}", schema, table.name, tp))
        };

        let job = match spec {
            AlterTableSpec::AddColumns {
                columns,
                position,
                if_not_exists,
            } => {
                let mut added: Vec<ColumnInfo> = Vec::new();
                for def in columns {
                    if table.find_column(&def.name).is_some() || added.iter().any(|c| c.name.eq_ignore_case(&def.name)) {
                        let err: DdlError = SchemaError::ColumnExists(def.name.clone()).into();
                        if *if_not_exists {
                            warnings.push(SqlWarning::note(&err));
                            continue;
                        }
                        return Err(err);
                    }
                    if def.auto_increment || def.primary_key || def.auto_random.is_some() {
                        return Err(ValidationError::UnsupportedDdlOperation(format!(
                            "add column '{}' with constraint PRIMARY KEY, AUTO_INCREMENT or AUTO_RANDOM",
                            def.name
                        ))
                        .into());
                    }
                    let mut col = build_column(def, (&table.charset, &table.collate))?;
                    col.origin_default = origin_default(&col)?;
                    added.push(col);
                }
                if added.is_empty() {
                    return Ok(warnings);
                }
                if let ColumnPosition::After(after) = position {
                    if table.find_column(&after.l).is_none() {
                        return Err(SchemaError::ColumnNotExists {
                            column: after.o.clone(),
                            table: table.name.o.clone(),
                        }
                        .into());
                    }
                }
                let mut all: Vec<ColumnInfo> = table.columns.iter().filter(|c| !c.hidden).cloned().collect();
                all.extend(added.iter().cloned());
                check_generated_columns(&all, ctx.enable_auto_increment_in_generated)?;

                let positions: Vec<ColumnPosition> = (0..added.len())
                    .map(|i| match (i, position) {
                        (0, pos) => pos.clone(),
                        (_, ColumnPosition::None) => ColumnPosition::None,
                        (i, _) => ColumnPosition::After(added[i - 1].name.clone()),
                    })
                    .collect();
                job(
                    ActionType::AddColumns,
                    JobArgs::AddColumns {
                        columns: added,
                        positions,
                        if_not_exists: *if_not_exists,
                    },
                )
            }
            AlterTableSpec::DropColumn { name: col_name, if_exists } => {
                let Some(col) = table.find_column(col_name).filter(|c| !c.hidden) else {
                    let err: DdlError = SchemaError::CantDropFieldOrKey(col_name.clone()).into();
                    return if *if_exists { Ok(vec![SqlWarning::note(&err)]) } else { Err(err) };
                };
                if table.public_columns().count() <= 1 {
                    return Err(ValidationError::CantRemoveAllFields.into());
                }
                if col.primary_key && (table.pk_is_handle || table.is_common_handle) {
                    return Err(ValidationError::UnsupportedDdlOperation(format!(
                        "drop column {} with primary key covered now",
                        col.name
                    ))
                    .into());
                }
                if table
                    .indices
                    .iter()
                    .any(|i| i.columns.len() > 1 && i.columns.iter().any(|ic| ic.name.l == col.name.l))
                {
                    return Err(ValidationError::UnsupportedDdlOperation(format!(
                        "drop column {} with composite index covered now",
                        col.name
                    ))
                    .into());
                }
                job(ActionType::DropColumn, JobArgs::DropColumn { name: col.name.clone() })
            }
            AlterTableSpec::ModifyColumn {
                old_name,
                column,
                position,
            } => {
                let from = table
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_case(old_name) && !c.hidden && c.state == SchemaState::Public)
                    .ok_or_else(|| SchemaError::ColumnNotExists {
                        column: old_name.clone(),
                        table: table.name.o.clone(),
                    })?;
                let old = &table.columns[from];
                if !column.name.eq_ignore_ascii_case(old_name) && table.find_column(&column.name).is_some() {
                    return Err(SchemaError::ColumnExists(column.name.clone()).into());
                }
                let mut col = build_column(column, (&table.charset, &table.collate))?;
                if column.charset.is_none() && column.collations.is_empty() && col.field_type.tp.has_charset() {
                    col.field_type.charset = old.field_type.charset.clone();
                    col.field_type.collate = old.field_type.collate.clone();
                }
                check_modify_compatible(&old.field_type, &col.field_type)?;
                col.primary_key = old.primary_key;
                col.not_null |= old.primary_key;
                if let ColumnPosition::After(after) = position {
                    if table.find_column(&after.l).is_none() {
                        return Err(SchemaError::ColumnNotExists {
                            column: after.o.clone(),
                            table: table.name.o.clone(),
                        }
                        .into());
                    }
                }
                let mut all = table.columns.clone();
                all[from] = ColumnInfo {
                    id: old.id,
                    ..col.clone()
                };
                let all: Vec<ColumnInfo> = reordered(&all, from, position)
                    .into_iter()
                    .filter(|c| !c.hidden)
                    .collect();
                check_generated_columns(&all, ctx.enable_auto_increment_in_generated)?;
                job(
                    ActionType::ModifyColumn,
                    JobArgs::ModifyColumn {
                        column: col,
                        old_name: old.name.clone(),
                        position: position.clone(),
                    },
                )
            }
            AlterTableSpec::AlterColumnDefault { name: col_name, default } => {
                let mut col = table
                    .find_column(col_name)
                    .filter(|c| !c.hidden)
                    .cloned()
                    .ok_or_else(|| SchemaError::ColumnNotExists {
                        column: col_name.clone(),
                        table: table.name.o.clone(),
                    })?;
                col.default_value = default.clone();
                check_default_value(&col)?;
                job(ActionType::SetDefaultValue, JobArgs::SetDefaultValue { column: col })
            }
            AlterTableSpec::AddIndex { index, if_not_exists } => {
                let name = match &index.name {
                    Some(name) if !index.primary => name.clone(),
                    _ => default_index_name(table, index),
                };
                if table.find_index(&name).is_some() {
                    let err: DdlError = SchemaError::IndexExists(name).into();
                    return if *if_not_exists { Ok(vec![SqlWarning::note(&err)]) } else { Err(err) };
                }
                if index.primary && (table.primary_index().is_some() || table.pk_is_handle) {
                    return Err(ValidationError::MultiplePriKey.into());
                }
                let (index, hidden_columns) = build_index(table, index, &name)?;
                job(ActionType::AddIndex, JobArgs::AddIndex { index, hidden_columns })
            }
            AlterTableSpec::DropIndex { name: index_name, if_exists } => {
                let Some(index) = table.find_index(index_name) else {
                    let err: DdlError = SchemaError::CantDropFieldOrKey(index_name.clone()).into();
                    return if *if_exists { Ok(vec![SqlWarning::note(&err)]) } else { Err(err) };
                };
                if index.primary && table.is_common_handle {
                    return Err(ValidationError::UnsupportedDdlOperation(
                        "drop the clustered primary key".to_string(),
                    )
                    .into());
                }
                job(ActionType::DropIndex, JobArgs::DropIndex { name: index.name.clone() })
            }
            AlterTableSpec::AutoIncrement { value, force } => job(
                ActionType::RebaseAutoId,
                JobArgs::RebaseAutoId {
                    new_base: *value,
                    force: *force,
                },
            ),
            AlterTableSpec::AutoRandomBase { value, force } => {
                if !table.contains_auto_random_bits() {
                    return Err(AutoIdError::rebase_not_applicable().into());
                }
                job(
                    ActionType::RebaseAutoRandomBase,
                    JobArgs::RebaseAutoId {
                        new_base: *value,
                        force: *force,
                    },
                )
            }
            AlterTableSpec::ShardRowIdBits(bits) => {
                if *bits > 0 && table.pk_is_handle {
                    return Err(ValidationError::UnsupportedShardRowIdBits.into());
                }
                job(
                    ActionType::ShardRowId,
                    JobArgs::ShardRowId {
                        bits: (*bits).min(MAX_SHARD_ROW_ID_BITS),
                    },
                )
            }
            AlterTableSpec::AutoIdCache(cache) => {
                if *cache < 1 {
                    return Err(ValidationError::UnsupportedDdlOperation(format!("auto_id_cache = {}", cache)).into());
                }
                job(ActionType::ModifyTableAutoIdCache, JobArgs::ModifyAutoIdCache { cache: *cache })
            }
            AlterTableSpec::PlacementPolicy(policy) => job(
                ActionType::AlterTablePlacement,
                JobArgs::AlterTablePlacement {
                    policy_ref: ctx.optional_policy_ref(policy.as_deref())?,
                },
            ),
        };
        self.submit(job).await?;
        Ok(warnings)
    }

    pub async fn create_placement_policy(&self, ctx: &ExecContext, stmt: &CreatePolicyStmt) -> Result<Vec<SqlWarning>> {
        check_identifier(&stmt.name)?;
        if stmt.if_not_exists && stmt.or_replace {
            return Err(ValidationError::UnsupportedDdlOperation(
                "CREATE OR REPLACE PLACEMENT POLICY ... IF NOT EXISTS".to_string(),
            )
            .into());
        }
        stmt.settings.validate()?;
        if ctx.is.policy_by_name(&stmt.name).is_some() && !stmt.or_replace {
            let err: DdlError = PlacementError::PolicyExists(stmt.name.clone()).into();
            return if stmt.if_not_exists { Ok(vec![SqlWarning::note(&err)]) } else { Err(err) };
        }
        let id = self.new_id()?;
        let policy = PolicyInfo {
            id,
            name: CIStr::new(stmt.name.as_str()),
            settings: stmt.settings.clone(),
            state: SchemaState::None,
        };
        let job = Job::new(
            ActionType::CreatePlacementPolicy,
            id,
            0,
            JobArgs::CreatePolicy {
                policy,
                or_replace: stmt.or_replace,
            },
        )
        .with_names(&stmt.name, "")
        .with_query(format!("CREATE PLACEMENT POLICY `{}`", stmt.name));
        tolerate(self.submit(job).await, stmt.if_not_exists, &[8238])
    }

    pub async fn alter_placement_policy(&self, ctx: &ExecContext, name: &str, settings: &PlacementSettings) -> Result<()> {
        let existing = ctx
            .is
            .policy_by_name(name)
            .ok_or_else(|| PlacementError::PolicyNotExists(name.to_string()))?;
        settings.validate()?;
        let policy = PolicyInfo {
            settings: settings.clone(),
            ..existing.as_ref().clone()
        };
        let job = Job::new(ActionType::AlterPlacementPolicy, existing.id, 0, JobArgs::AlterPolicy { policy })
            .with_names(&existing.name.o, "")
            .with_query(format!("ALTER PLACEMENT POLICY `{}`", existing.name));
        self.submit(job).await.map(|_| ())
    }

    pub async fn drop_placement_policy(&self, ctx: &ExecContext, name: &str, if_exists: bool) -> Result<Vec<SqlWarning>> {
        let Some(policy) = ctx.is.policy_by_name(name) else {
            let err: DdlError = PlacementError::PolicyNotExists(name.to_string()).into();
            return if if_exists { Ok(vec![SqlWarning::note(&err)]) } else { Err(err) };
        };
        check_policy_not_in_use_from_info_schema(&ctx.is, &policy)?;
        let job = Job::new(ActionType::DropPlacementPolicy, policy.id, 0, JobArgs::None)
            .with_names(&policy.name.o, "")
            .with_query(format!("DROP PLACEMENT POLICY `{}`", policy.name));
        tolerate(self.submit(job).await, if_exists, &[8239])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(tp: ColumnType) -> FieldType {
        FieldType::new(tp)
    }

    #[test]
    fn test_modify_allows_widening_only() {
        assert!(check_modify_compatible(&field(ColumnType::Int), &field(ColumnType::BigInt)).is_ok());
        let err = check_modify_compatible(&field(ColumnType::BigInt), &field(ColumnType::Int)).unwrap_err();
        assert_eq!(err.code(), 8200);
        assert!(check_modify_compatible(&FieldType::varchar(10), &FieldType::varchar(20)).is_ok());
        assert!(check_modify_compatible(&FieldType::varchar(20), &FieldType::varchar(10)).is_err());
        assert!(check_modify_compatible(&field(ColumnType::Int), &FieldType::varchar(10)).is_err());
    }

    #[test]
    fn test_origin_default_for_not_null_column() {
        let mut col = build_column(&ColumnDef::new("c", FieldType::int()).not_null(), ("utf8mb4", "utf8mb4_bin")).unwrap();
        assert_eq!(origin_default(&col).unwrap(), Some(Datum::Int(0)));
        col.not_null = false;
        assert_eq!(origin_default(&col).unwrap(), Some(Datum::Null));
        col.default_value = Some(DefaultValue::Literal(Datum::from("7")));
        assert_eq!(origin_default(&col).unwrap(), Some(Datum::Int(7)));
    }

    #[test]
    fn test_column_charset_follows_collation() {
        let def = ColumnDef::new("c", FieldType::varchar(10)).collate("utf8_general_ci");
        let col = build_column(&def, ("utf8mb4", "utf8mb4_bin")).unwrap();
        assert_eq!(col.field_type.charset, "utf8");
        assert_eq!(col.field_type.collate, "utf8_general_ci");
        let col = build_column(&ColumnDef::new("i", FieldType::int()), ("utf8mb4", "utf8mb4_bin")).unwrap();
        assert_eq!(col.field_type.charset, "binary");
    }

    #[test]
    fn test_reordered_moves_column() {
        let cols: Vec<ColumnInfo> = ["a", "b", "c"]
            .iter()
            .map(|n| build_column(&ColumnDef::new(n, FieldType::int()), ("utf8mb4", "utf8mb4_bin")).unwrap())
            .collect();
        let names = |cols: Vec<ColumnInfo>| cols.into_iter().map(|c| c.name.o).collect::<Vec<_>>();
        assert_eq!(names(reordered(&cols, 2, &ColumnPosition::First)), vec!["c", "a", "b"]);
        assert_eq!(names(reordered(&cols, 0, &ColumnPosition::After("c".into()))), vec!["b", "c", "a"]);
    }
}
