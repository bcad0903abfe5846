//! A client session: current database, session variables, the warnings of
//! the last statement, and the statement entry points.

use std::sync::Arc;

use tracing::debug;

use crate::charset::{charset_of_collation, get_charset};
use crate::ddl::stmt::{
    AlterDatabaseOption, AlterTableSpec, CreateDatabaseStmt, CreatePolicyStmt, CreateSequenceStmt, CreateTableStmt,
    CreateViewStmt, DropKind, TableName,
};
use crate::ddl::{ExecContext, vars};
use crate::domain::Domain;
use crate::errors::{PlannerError, Result, SchemaError, SqlWarning, ValidationError};
use crate::infoschema::{InfoSchema, TableHandle};
use crate::kv::run_in_new_txn;
use crate::model::{Datum, Job, PlacementSettings};
use crate::table::{self, WriteOptions};
use crate::view::resolve_view;

pub const CHARACTER_SET_SERVER: &str = "character_set_server";
pub const COLLATION_SERVER: &str = "collation_server";
pub const ENABLE_AUTO_INCREMENT_IN_GENERATED: &str = "tidb_enable_auto_increment_in_generated";
pub const ALLOW_AUTO_RANDOM_EXPLICIT_INSERT: &str = "allow_auto_random_explicit_insert";

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        _ => Err(ValidationError::WrongTypeForVar(name.to_string()).into()),
    }
}

fn format_bool(v: bool) -> String {
    if v { "ON" } else { "OFF" }.to_string()
}

pub struct Session {
    domain: Arc<Domain>,
    current_db: Option<String>,
    charset_server: String,
    collation_server: String,
    enable_auto_increment_in_generated: bool,
    allow_auto_random_explicit_insert: bool,
    warnings: Vec<SqlWarning>,
}

impl Session {
    pub fn new(domain: Arc<Domain>) -> Self {
        let session = &domain.config().session;
        Self {
            charset_server: session.character_set_server.clone(),
            collation_server: session.collation_server.clone(),
            domain,
            current_db: None,
            enable_auto_increment_in_generated: false,
            allow_auto_random_explicit_insert: false,
            warnings: Vec::new(),
        }
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn current_db(&self) -> Option<&str> {
        self.current_db.as_deref()
    }

    pub fn use_db(&mut self, name: &str) -> Result<()> {
        let db = self
            .domain
            .info_schema()
            .schema_by_name(name)
            .ok_or_else(|| SchemaError::DatabaseNotExists { name: name.to_string() })?;
        self.current_db = Some(db.name.o.clone());
        Ok(())
    }

    /// Warnings raised by the last statement.
    pub fn warnings(&self) -> &[SqlWarning] {
        &self.warnings
    }

    pub fn set_var(&mut self, name: &str, value: &str) -> Result<()> {
        self.warnings.clear();
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            CHARACTER_SET_SERVER => {
                let cs = get_charset(value)?;
                self.charset_server = cs.name.to_string();
                self.collation_server = cs.default_collation.to_string();
            }
            COLLATION_SERVER => {
                let cs = charset_of_collation(value)?;
                self.charset_server = cs.name.to_string();
                self.collation_server = value.to_ascii_lowercase();
            }
            ENABLE_AUTO_INCREMENT_IN_GENERATED | "enable_auto_increment_in_generated" => {
                self.enable_auto_increment_in_generated = parse_bool(name, value)?;
            }
            ALLOW_AUTO_RANDOM_EXPLICIT_INSERT => {
                self.allow_auto_random_explicit_insert = parse_bool(name, value)?;
            }
            vars::TIDB_DDL_REORG_WORKER_CNT | vars::TIDB_DDL_REORG_BATCH_SIZE | vars::TIDB_DDL_ERROR_COUNT_LIMIT => {
                let parsed: i64 = value
                    .trim()
                    .parse()
                    .map_err(|_| ValidationError::WrongTypeForVar(name.to_string()))?;
                if let Some(Some(warning)) = self.domain.vars().set_by_name(&lower, parsed) {
                    self.warnings.push(warning);
                }
            }
            _ => return Err(ValidationError::UnknownSystemVariable(name.to_string()).into()),
        }
        debug!(name = %lower, value, "session variable set");
        Ok(())
    }

    pub fn get_var(&self, name: &str) -> Result<String> {
        let lower = name.to_ascii_lowercase();
        let value = match lower.as_str() {
            CHARACTER_SET_SERVER => self.charset_server.clone(),
            COLLATION_SERVER => self.collation_server.clone(),
            ENABLE_AUTO_INCREMENT_IN_GENERATED | "enable_auto_increment_in_generated" => {
                format_bool(self.enable_auto_increment_in_generated)
            }
            ALLOW_AUTO_RANDOM_EXPLICIT_INSERT => format_bool(self.allow_auto_random_explicit_insert),
            other => self
                .domain
                .vars()
                .get_by_name(other)
                .map(|v| v.to_string())
                .ok_or_else(|| ValidationError::UnknownSystemVariable(name.to_string()))?,
        };
        Ok(value)
    }

    fn ctx(&self) -> ExecContext {
        ExecContext {
            is: self.domain.info_schema(),
            current_db: self.current_db.clone(),
            charset_server: self.charset_server.clone(),
            collation_server: self.collation_server.clone(),
            enable_auto_increment_in_generated: self.enable_auto_increment_in_generated,
        }
    }

    fn record(&mut self, result: Result<Vec<SqlWarning>>) -> Result<()> {
        self.warnings = result?;
        Ok(())
    }

    pub async fn create_database(&mut self, stmt: &CreateDatabaseStmt) -> Result<()> {
        self.warnings.clear();
        let result = self.domain.ddl().create_database(&self.ctx(), stmt).await;
        self.record(result)
    }

    pub async fn drop_database(&mut self, name: &str, if_exists: bool) -> Result<()> {
        self.warnings.clear();
        let result = self.domain.ddl().drop_database(&self.ctx(), name, if_exists).await;
        self.record(result)?;
        if self.current_db.as_deref().is_some_and(|db| db.eq_ignore_ascii_case(name)) {
            self.current_db = None;
        }
        Ok(())
    }

    pub async fn alter_database(&mut self, name: &str, option: &AlterDatabaseOption) -> Result<()> {
        self.warnings.clear();
        self.domain.ddl().alter_database(&self.ctx(), name, option).await
    }

    pub async fn create_table(&mut self, stmt: &CreateTableStmt) -> Result<()> {
        self.warnings.clear();
        let result = self.domain.ddl().create_table(&self.ctx(), stmt).await;
        self.record(result)
    }

    pub async fn create_view(&mut self, stmt: &CreateViewStmt) -> Result<()> {
        self.warnings.clear();
        self.domain.ddl().create_view(&self.ctx(), stmt).await
    }

    pub async fn create_sequence(&mut self, stmt: &CreateSequenceStmt) -> Result<()> {
        self.warnings.clear();
        let result = self.domain.ddl().create_sequence(&self.ctx(), stmt).await;
        self.record(result)
    }

    pub async fn drop_tables(&mut self, names: &[TableName], if_exists: bool, kind: DropKind) -> Result<()> {
        self.warnings.clear();
        let result = self.domain.ddl().drop_tables(&self.ctx(), names, if_exists, kind).await;
        self.record(result)
    }

    pub async fn drop_table(&mut self, name: &str, if_exists: bool) -> Result<()> {
        self.drop_tables(&[TableName::from(name)], if_exists, DropKind::Table).await
    }

    pub async fn truncate_table(&mut self, name: &str) -> Result<()> {
        self.warnings.clear();
        self.domain.ddl().truncate_table(&self.ctx(), &TableName::from(name)).await
    }

    pub async fn rename_table(&mut self, from: &str, to: &str) -> Result<()> {
        self.rename_tables(&[(TableName::from(from), TableName::from(to))]).await
    }

    pub async fn rename_tables(&mut self, pairs: &[(TableName, TableName)]) -> Result<()> {
        self.warnings.clear();
        self.domain.ddl().rename_tables(&self.ctx(), pairs).await
    }

    /// Apply each clause as its own job, in order. Stops at the first failure.
    pub async fn alter_table(&mut self, name: &str, specs: &[AlterTableSpec]) -> Result<()> {
        self.warnings.clear();
        let table = TableName::from(name);
        let mut warnings = Vec::new();
        for spec in specs {
            let ctx = self.ctx();
            warnings.extend(self.domain.ddl().alter_table(&ctx, &table, spec).await?);
        }
        self.warnings = warnings;
        Ok(())
    }

    pub async fn create_placement_policy(&mut self, stmt: &CreatePolicyStmt) -> Result<()> {
        self.warnings.clear();
        let result = self.domain.ddl().create_placement_policy(&self.ctx(), stmt).await;
        self.record(result)
    }

    pub async fn alter_placement_policy(&mut self, name: &str, settings: &PlacementSettings) -> Result<()> {
        self.warnings.clear();
        self.domain.ddl().alter_placement_policy(&self.ctx(), name, settings).await
    }

    pub async fn drop_placement_policy(&mut self, name: &str, if_exists: bool) -> Result<()> {
        self.warnings.clear();
        let result = self.domain.ddl().drop_placement_policy(&self.ctx(), name, if_exists).await;
        self.record(result)
    }

    fn resolve(&self, is: &InfoSchema, name: &str) -> Result<(String, Arc<TableHandle>)> {
        let name = TableName::from(name);
        let schema = name
            .schema
            .clone()
            .or_else(|| self.current_db.clone())
            .ok_or(PlannerError::NoDb)?;
        let table = is.table_by_name(&schema, &name.name)?;
        Ok((schema, table))
    }

    fn base_table(&self, is: &InfoSchema, name: &str) -> Result<Arc<TableHandle>> {
        let (schema, table) = self.resolve(is, name)?;
        if !table.meta.is_base_table() {
            return Err(SchemaError::TableNotExists {
                schema,
                table: table.meta.name.o.clone(),
            }
            .into());
        }
        Ok(table)
    }

    /// Insert rows into a base table. `columns` empty means every visible,
    /// non-generated column in order. Returns the number of rows written.
    pub fn insert(&mut self, table: &str, columns: &[&str], rows: Vec<Vec<Datum>>) -> Result<usize> {
        self.warnings.clear();
        let is = self.domain.info_schema();
        let handle = self.base_table(&is, table)?;
        let opts = WriteOptions {
            allow_auto_random_explicit_insert: self.allow_auto_random_explicit_insert,
        };
        let count = rows.len();
        run_in_new_txn(self.domain.store(), self.domain.config().ddl.txn_retry_limit, |txn| {
            for row in &rows {
                table::add_record(txn, &handle, columns, row.clone(), opts)?;
            }
            Ok(())
        })?;
        Ok(count)
    }

    /// Every row of a table or view, visible columns only, in handle order.
    pub fn select_all(&self, name: &str) -> Result<Vec<Vec<Datum>>> {
        let is = self.domain.info_schema();
        let (schema, handle) = self.resolve(&is, name)?;
        if let Some(view) = handle.meta.view() {
            let bases = resolve_view(&is, &schema, &handle.meta.name.o)?;
            let invalid = || PlannerError::ViewInvalid {
                schema: schema.clone(),
                view: handle.meta.name.o.clone(),
            };
            let base = bases.first().ok_or_else(invalid)?;
            let offsets = view
                .columns
                .iter()
                .map(|c| base.meta.find_column(&c.l).map(|col| col.offset).ok_or_else(invalid))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let rows = self.scan(base)?;
            return Ok(rows
                .into_iter()
                .map(|row| offsets.iter().map(|&o| row.values[o].clone()).collect())
                .collect());
        }
        if handle.meta.is_sequence() {
            return Err(SchemaError::TableNotExists {
                schema,
                table: handle.meta.name.o.clone(),
            }
            .into());
        }
        let visible: Vec<usize> = handle.meta.public_columns().filter(|c| !c.hidden).map(|c| c.offset).collect();
        Ok(self
            .scan(&handle)?
            .into_iter()
            .map(|row| visible.iter().map(|&o| row.values[o].clone()).collect())
            .collect())
    }

    fn scan(&self, handle: &TableHandle) -> Result<Vec<table::Row>> {
        run_in_new_txn(self.domain.store(), self.domain.config().ddl.txn_retry_limit, |txn| {
            table::scan_rows(txn, &handle.meta)
        })
    }

    pub fn delete_all(&mut self, name: &str) -> Result<usize> {
        self.warnings.clear();
        let is = self.domain.info_schema();
        let handle = self.base_table(&is, name)?;
        run_in_new_txn(self.domain.store(), self.domain.config().ddl.txn_retry_limit, |txn| {
            table::remove_all(txn, &handle.meta)
        })
    }

    pub fn show_jobs(&self, history_limit: usize) -> Result<Vec<Job>> {
        self.domain.ddl().show_jobs(history_limit)
    }

    pub fn job_status(&self, job_id: i64) -> Result<Job> {
        self.domain.ddl().job_status(job_id)
    }

    pub fn cancel_job(&self, job_id: i64) -> Result<()> {
        self.domain.ddl().cancel_job(job_id)
    }

    pub fn resume_job(&self, job_id: i64) -> Result<()> {
        self.domain.ddl().resume_job(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::ddl::stmt::ColumnDef;
    use crate::kv::MemStore;
    use crate::model::FieldType;

    async fn session() -> Session {
        let config = ConfigBuilder::new().tick_ms(5).job_wait_timeout_ms(5_000).build();
        let domain = Domain::open(MemStore::new_ref(), config).await.unwrap();
        let mut se = domain.new_session();
        se.use_db("test").unwrap();
        se
    }

    #[tokio::test]
    async fn test_session_variables() {
        let mut se = session().await;
        se.set_var("collation_server", "utf8_general_ci").unwrap();
        assert_eq!(se.get_var("character_set_server").unwrap(), "utf8");
        se.set_var("enable_auto_increment_in_generated", "on").unwrap();
        assert_eq!(se.get_var("tidb_enable_auto_increment_in_generated").unwrap(), "ON");
        assert_eq!(se.set_var("no_such_var", "1").unwrap_err().code(), 1193);
        assert_eq!(se.set_var("allow_auto_random_explicit_insert", "maybe").unwrap_err().code(), 1232);

        se.set_var("tidb_ddl_reorg_worker_cnt", "1000").unwrap();
        assert_eq!(se.warnings().len(), 1);
        assert_eq!(se.get_var("tidb_ddl_reorg_worker_cnt").unwrap(), "256");
        se.domain().close().await;
    }

    #[tokio::test]
    async fn test_insert_and_select() {
        let mut se = session().await;
        se.create_table(&CreateTableStmt::new(
            "t",
            vec![
                ColumnDef::new("a", FieldType::int()).primary_key(),
                ColumnDef::new("b", FieldType::varchar(10)),
            ],
        ))
        .await
        .unwrap();
        se.insert("t", &[], vec![vec![Datum::Int(2), Datum::from("x")], vec![Datum::Int(1), Datum::Null]])
            .unwrap();
        let rows = se.select_all("t").unwrap();
        assert_eq!(rows, vec![vec![Datum::Int(1), Datum::Null], vec![Datum::Int(2), Datum::from("x")]]);
        assert_eq!(se.delete_all("t").unwrap(), 2);
        assert!(se.select_all("t").unwrap().is_empty());
        assert_eq!(se.select_all("missing").unwrap_err().code(), 1146);
        se.domain().close().await;
    }
}
