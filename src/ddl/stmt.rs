//! Resolved DDL statements as handed to the executor.
//!
//! These are the already-parsed forms of the statements; names are plain
//! strings and are resolved against the session's InfoSchema when executed.

use crate::model::{ColumnPosition, DefaultValue, Expr, FieldType, PartitionType, PlacementSettings, SequenceInfo};

/// `[schema.]name`; an absent schema means the current database.
#[derive(Debug, Clone, PartialEq)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(name: &str) -> Self {
        Self {
            schema: None,
            name: name.to_string(),
        }
    }

    pub fn qualified(schema: &str, name: &str) -> Self {
        Self {
            schema: Some(schema.to_string()),
            name: name.to_string(),
        }
    }
}

impl From<&str> for TableName {
    fn from(s: &str) -> Self {
        match s.split_once('.') {
            Some((schema, name)) => TableName::qualified(schema, name),
            None => TableName::new(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedDef {
    pub expr: Expr,
    pub stored: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub field_type: FieldType,
    pub charset: Option<String>,
    /// COLLATE clauses in the order written.
    pub collations: Vec<String>,
    pub not_null: bool,
    pub default: Option<DefaultValue>,
    pub auto_increment: bool,
    /// `AUTO_RANDOM(shard_bits[, range_bits])`.
    pub auto_random: Option<(u64, Option<u64>)>,
    pub primary_key: bool,
    pub unique: bool,
    pub generated: Option<GeneratedDef>,
    pub comment: String,
}

impl ColumnDef {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            charset: None,
            collations: Vec::new(),
            not_null: false,
            default: None,
            auto_increment: false,
            auto_random: None,
            primary_key: false,
            unique: false,
            generated: None,
            comment: String::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn auto_random(mut self, shard_bits: u64) -> Self {
        self.auto_random = Some((shard_bits, None));
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn charset(mut self, charset: &str) -> Self {
        self.charset = Some(charset.to_string());
        self
    }

    pub fn collate(mut self, collation: &str) -> Self {
        self.collations.push(collation.to_string());
        self
    }

    pub fn generated(mut self, expr: Expr, stored: bool) -> Self {
        self.generated = Some(GeneratedDef { expr, stored });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexPart {
    Column { name: String, length: Option<u32> },
    Expr(Expr),
}

impl IndexPart {
    pub fn column(name: &str) -> Self {
        IndexPart::Column {
            name: name.to_string(),
            length: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: Option<String>,
    pub parts: Vec<IndexPart>,
    pub unique: bool,
    pub primary: bool,
}

impl IndexDef {
    pub fn new(name: &str, parts: Vec<IndexPart>) -> Self {
        Self {
            name: Some(name.to_string()),
            parts,
            unique: false,
            primary: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableOptions {
    pub charset: Option<String>,
    pub collate: Option<String>,
    pub auto_increment: Option<i64>,
    pub auto_random_base: Option<i64>,
    pub shard_row_id_bits: Option<u64>,
    pub auto_id_cache: Option<i64>,
    pub placement_policy: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionDef {
    pub name: String,
    pub less_than: Vec<String>,
    pub in_values: Vec<String>,
    pub placement_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSpec {
    pub tp: PartitionType,
    pub expr: String,
    pub definitions: Vec<PartitionDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub table: TableName,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    pub options: TableOptions,
    pub partition: Option<PartitionSpec>,
    pub if_not_exists: bool,
    /// `CLUSTERED` / `NONCLUSTERED` on the primary key.
    pub clustered: Option<bool>,
}

impl CreateTableStmt {
    pub fn new(table: impl Into<TableName>, columns: Vec<ColumnDef>) -> Self {
        Self {
            table: table.into(),
            columns,
            indexes: Vec::new(),
            options: TableOptions::default(),
            partition: None,
            if_not_exists: false,
            clustered: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateDatabaseStmt {
    pub name: String,
    pub if_not_exists: bool,
    pub charset: Option<String>,
    pub collate: Option<String>,
    pub placement_policy: Option<String>,
}

impl CreateDatabaseStmt {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterDatabaseOption {
    Charset { charset: Option<String>, collate: Option<String> },
    /// `PLACEMENT POLICY = DEFAULT` clears the reference.
    PlacementPolicy(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateViewStmt {
    pub view: TableName,
    /// Optional explicit column list.
    pub columns: Vec<String>,
    /// Output names of the select list.
    pub select_fields: Vec<String>,
    /// Tables and views the select reads from.
    pub references: Vec<TableName>,
    pub select_sql: String,
    pub or_replace: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSequenceStmt {
    pub name: TableName,
    pub if_not_exists: bool,
    pub options: SequenceInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropKind {
    Table,
    View,
    Sequence,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterTableSpec {
    AddColumns {
        columns: Vec<ColumnDef>,
        position: ColumnPosition,
        if_not_exists: bool,
    },
    DropColumn { name: String, if_exists: bool },
    /// MODIFY keeps the name; CHANGE supplies a new one in `column`.
    ModifyColumn {
        old_name: String,
        column: ColumnDef,
        position: ColumnPosition,
    },
    /// `ALTER COLUMN c SET DEFAULT v` or `DROP DEFAULT` (None).
    AlterColumnDefault { name: String, default: Option<DefaultValue> },
    AddIndex { index: IndexDef, if_not_exists: bool },
    DropIndex { name: String, if_exists: bool },
    AutoIncrement { value: i64, force: bool },
    AutoRandomBase { value: i64, force: bool },
    ShardRowIdBits(u64),
    AutoIdCache(i64),
    PlacementPolicy(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePolicyStmt {
    pub name: String,
    pub settings: PlacementSettings,
    pub if_not_exists: bool,
    pub or_replace: bool,
}
