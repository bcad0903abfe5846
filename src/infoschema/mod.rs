//! Immutable, versioned snapshots of every schema object.
//!
//! An `InfoSchema` is never mutated once built. The builder clones the
//! previous generation's maps (entries are `Arc`s) and swaps the objects a
//! schema diff touched.

mod builder;
mod cache;

use std::collections::HashMap;
use std::sync::Arc;

use crate::autoid::{Allocator, AllocatorType, Allocators};
use crate::errors::{Result, SchemaError};
use crate::model::{DatabaseInfo, PolicyInfo, SchemaState, TableInfo};

pub use builder::Builder;
pub use cache::InfoCache;

/// A table as seen by one InfoSchema generation, with its allocators.
#[derive(Debug)]
pub struct TableHandle {
    pub meta: Arc<TableInfo>,
    pub db_id: i64,
    pub allocators: Allocators,
}

impl TableHandle {
    pub fn allocator(&self, tp: AllocatorType) -> Option<Arc<Allocator>> {
        self.allocators.get(tp)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SchemaTables {
    pub(crate) info: Arc<DatabaseInfo>,
    /// Keyed by lower-cased table name.
    pub(crate) tables: HashMap<String, Arc<TableHandle>>,
}

#[derive(Debug, Clone, Default)]
pub struct InfoSchema {
    version: i64,
    /// Keyed by lower-cased schema name.
    schemas: HashMap<String, SchemaTables>,
    schema_names: HashMap<i64, String>,
    tables_by_id: HashMap<i64, Arc<TableHandle>>,
    /// Keyed by lower-cased policy name.
    policies: HashMap<String, Arc<PolicyInfo>>,
}

impl InfoSchema {
    pub fn schema_meta_version(&self) -> i64 {
        self.version
    }

    /// A public database by name.
    pub fn schema_by_name(&self, name: &str) -> Option<Arc<DatabaseInfo>> {
        self.schemas
            .get(&name.to_lowercase())
            .filter(|s| s.info.state == SchemaState::Public)
            .map(|s| s.info.clone())
    }

    pub fn schema_by_id(&self, id: i64) -> Option<Arc<DatabaseInfo>> {
        self.schema_names
            .get(&id)
            .and_then(|name| self.schemas.get(name))
            .map(|s| s.info.clone())
    }

    pub fn schema_exists(&self, name: &str) -> bool {
        self.schema_by_name(name).is_some()
    }

    /// Public databases sorted by name.
    pub fn all_schemas(&self) -> Vec<Arc<DatabaseInfo>> {
        let mut dbs: Vec<Arc<DatabaseInfo>> = self
            .schemas
            .values()
            .filter(|s| s.info.state == SchemaState::Public)
            .map(|s| s.info.clone())
            .collect();
        dbs.sort_by(|a, b| a.name.l.cmp(&b.name.l));
        dbs
    }

    /// A public table, view or sequence by name.
    pub fn table_by_name(&self, schema: &str, table: &str) -> Result<Arc<TableHandle>> {
        self.schemas
            .get(&schema.to_lowercase())
            .filter(|s| s.info.state == SchemaState::Public)
            .and_then(|s| s.tables.get(&table.to_lowercase()))
            .filter(|t| t.meta.state == SchemaState::Public)
            .cloned()
            .ok_or_else(|| {
                SchemaError::TableNotExists {
                    schema: schema.to_string(),
                    table: table.to_string(),
                }
                .into()
            })
    }

    pub fn table_exists(&self, schema: &str, table: &str) -> bool {
        self.table_by_name(schema, table).is_ok()
    }

    /// Any table by ID, including ones in intermediate states.
    pub fn table_by_id(&self, id: i64) -> Option<Arc<TableHandle>> {
        self.tables_by_id.get(&id).cloned()
    }

    /// Public tables of a schema sorted by name.
    pub fn schema_tables(&self, schema: &str) -> Vec<Arc<TableHandle>> {
        let mut tables: Vec<Arc<TableHandle>> = self
            .schemas
            .get(&schema.to_lowercase())
            .map(|s| {
                s.tables
                    .values()
                    .filter(|t| t.meta.state == SchemaState::Public)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        tables.sort_by(|a, b| a.meta.name.l.cmp(&b.meta.name.l));
        tables
    }

    /// Every table in every state, for reference scans.
    pub fn all_tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables_by_id.values().map(|t| t.meta.as_ref())
    }

    pub fn all_databases(&self) -> impl Iterator<Item = &DatabaseInfo> {
        self.schemas.values().map(|s| s.info.as_ref())
    }

    pub fn policy_by_name(&self, name: &str) -> Option<Arc<PolicyInfo>> {
        self.policies.get(&name.to_lowercase()).cloned()
    }

    pub fn all_policies(&self) -> Vec<Arc<PolicyInfo>> {
        let mut policies: Vec<Arc<PolicyInfo>> = self.policies.values().cloned().collect();
        policies.sort_by_key(|p| p.id);
        policies
    }
}
