use serde::{Deserialize, Serialize};

use crate::errors::{PlacementError, Result};
use crate::model::{CIStr, Datum, Expr, FieldType, SchemaState};

/// Reference from a database, table or partition to a placement policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRefInfo {
    pub id: i64,
    pub name: CIStr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementSettings {
    pub primary_region: String,
    pub regions: String,
    pub learners: u64,
    pub followers: u64,
    pub voters: u64,
    pub schedule: String,
    pub constraints: String,
    pub leader_constraints: String,
    pub follower_constraints: String,
    pub learner_constraints: String,
}

impl PlacementSettings {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(PlacementError::InvalidOption(msg.to_string()).into());
        let has_regions = !self.primary_region.is_empty() || !self.regions.is_empty();
        let has_constraints = !self.constraints.is_empty()
            || !self.leader_constraints.is_empty()
            || !self.follower_constraints.is_empty()
            || !self.learner_constraints.is_empty();
        if has_regions && has_constraints {
            return invalid("constraints may not be combined with PRIMARY_REGION or REGIONS");
        }
        if self.primary_region.is_empty() != self.regions.is_empty() {
            return invalid("PRIMARY_REGION and REGIONS must be specified together");
        }
        if !self.primary_region.is_empty()
            && !self.regions.split(',').any(|r| r.trim() == self.primary_region)
        {
            return invalid("PRIMARY_REGION must be one of REGIONS");
        }
        if !self.schedule.is_empty()
            && !matches!(self.schedule.to_uppercase().as_str(), "EVEN" | "MAJORITY_IN_PRIMARY")
        {
            return invalid("SCHEDULE must be EVEN or MAJORITY_IN_PRIMARY");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub id: i64,
    pub name: CIStr,
    pub settings: PlacementSettings,
    pub state: SchemaState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub id: i64,
    pub name: CIStr,
    pub charset: String,
    pub collate: String,
    pub placement_policy_ref: Option<PolicyRefInfo>,
    pub state: SchemaState,
    /// Filled only when snapshots are assembled; tables are stored separately.
    #[serde(skip)]
    pub tables: Vec<TableInfo>,
}

impl DatabaseInfo {
    pub fn new(id: i64, name: &str, charset: &str, collate: &str) -> Self {
        Self {
            id,
            name: CIStr::new(name),
            charset: charset.to_string(),
            collate: collate.to_string(),
            placement_policy_ref: None,
            state: SchemaState::Public,
            tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    Literal(Datum),
    CurrentTimestamp { fsp: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedColumn {
    pub expr: Expr,
    pub stored: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub id: i64,
    pub name: CIStr,
    pub offset: usize,
    pub field_type: FieldType,
    pub default_value: Option<DefaultValue>,
    /// Value observed by rows written before the column was added.
    pub origin_default: Option<Datum>,
    pub generated: Option<GeneratedColumn>,
    pub not_null: bool,
    /// Set while a NOT NULL constraint is being added: writes must already
    /// reject NULL although existing rows have not been checked yet.
    #[serde(default)]
    pub prevent_null_insert: bool,
    pub auto_increment: bool,
    pub primary_key: bool,
    /// Backing column of an expression index; invisible to users.
    pub hidden: bool,
    pub state: SchemaState,
    pub comment: String,
}

impl ColumnInfo {
    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }

    pub fn is_stored_generated(&self) -> bool {
        self.generated.as_ref().is_some_and(|g| g.stored)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: CIStr,
    pub offset: usize,
    pub length: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub id: i64,
    pub name: CIStr,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
    pub primary: bool,
    pub state: SchemaState,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: CIStr,
    pub name: CIStr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewInfo {
    pub algorithm: String,
    pub definer: String,
    pub security: String,
    pub select_sql: String,
    pub columns: Vec<CIStr>,
    /// Tables and views the select reads, resolved at definition time.
    pub references: Vec<TableRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceInfo {
    pub start: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cache: bool,
    pub cache_value: i64,
    pub cycle: bool,
}

impl Default for SequenceInfo {
    fn default() -> Self {
        Self {
            start: 1,
            increment: 1,
            min_value: 1,
            max_value: i64::MAX - 1,
            cache: true,
            cache_value: 1000,
            cycle: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableKind {
    BaseTable,
    View(ViewInfo),
    Sequence(SequenceInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionType {
    Range,
    Hash,
    List,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionDefinition {
    pub id: i64,
    pub name: CIStr,
    pub less_than: Vec<String>,
    pub in_values: Vec<String>,
    pub placement_policy_ref: Option<PolicyRefInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub tp: PartitionType,
    pub expr: String,
    pub definitions: Vec<PartitionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: i64,
    pub name: CIStr,
    pub charset: String,
    pub collate: String,
    pub columns: Vec<ColumnInfo>,
    pub indices: Vec<IndexInfo>,
    pub kind: TableKind,
    /// The single integer primary key column doubles as the row handle.
    pub pk_is_handle: bool,
    /// Clustered non-integer primary key.
    pub is_common_handle: bool,
    /// Initial auto-increment value requested at creation or by the last rebase.
    pub auto_inc_id: i64,
    pub auto_rand_id: i64,
    pub auto_random_bits: u64,
    pub auto_random_range_bits: u64,
    pub shard_row_id_bits: u64,
    /// Largest shard_row_id_bits ever set; bounds the row ID space.
    pub max_shard_row_id_bits: u64,
    pub auto_id_cache: i64,
    pub placement_policy_ref: Option<PolicyRefInfo>,
    pub partition: Option<PartitionInfo>,
    pub state: SchemaState,
    pub comment: String,
    /// Column and index IDs are never reused within a table.
    #[serde(default)]
    pub max_column_id: i64,
    #[serde(default)]
    pub max_index_id: i64,
}

pub const AUTO_RANDOM_RANGE_BITS_DEFAULT: u64 = 64;

impl TableInfo {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: CIStr::new(name),
            charset: String::new(),
            collate: String::new(),
            columns: Vec::new(),
            indices: Vec::new(),
            kind: TableKind::BaseTable,
            pk_is_handle: false,
            is_common_handle: false,
            auto_inc_id: 0,
            auto_rand_id: 0,
            auto_random_bits: 0,
            auto_random_range_bits: AUTO_RANDOM_RANGE_BITS_DEFAULT,
            shard_row_id_bits: 0,
            max_shard_row_id_bits: 0,
            auto_id_cache: 0,
            placement_policy_ref: None,
            partition: None,
            state: SchemaState::None,
            comment: String::new(),
            max_column_id: 0,
            max_index_id: 0,
        }
    }

    pub fn is_base_table(&self) -> bool {
        matches!(self.kind, TableKind::BaseTable)
    }

    pub fn is_view(&self) -> bool {
        matches!(self.kind, TableKind::View(_))
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.kind, TableKind::Sequence(_))
    }

    pub fn view(&self) -> Option<&ViewInfo> {
        match &self.kind {
            TableKind::View(v) => Some(v),
            _ => None,
        }
    }

    /// Object kind as named in wrong-object errors.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            TableKind::BaseTable => "BASE TABLE",
            TableKind::View(_) => "VIEW",
            TableKind::Sequence(_) => "SEQUENCE",
        }
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnInfo> {
        let name = name.to_lowercase();
        self.columns.iter().find(|c| c.name.l == name)
    }

    pub fn find_column_mut(&mut self, name: &str) -> Option<&mut ColumnInfo> {
        let name = name.to_lowercase();
        self.columns.iter_mut().find(|c| c.name.l == name)
    }

    pub fn find_index(&self, name: &str) -> Option<&IndexInfo> {
        let name = name.to_lowercase();
        self.indices.iter().find(|i| i.name.l == name)
    }

    pub fn find_index_mut(&mut self, name: &str) -> Option<&mut IndexInfo> {
        let name = name.to_lowercase();
        self.indices.iter_mut().find(|i| i.name.l == name)
    }

    /// Columns visible to queries, in ordinal order.
    pub fn public_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns
            .iter()
            .filter(|c| c.state == SchemaState::Public && !c.hidden)
    }

    /// Columns a row write must populate.
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.state.is_writable())
    }

    pub fn pk_handle_column(&self) -> Option<&ColumnInfo> {
        if !self.pk_is_handle {
            return None;
        }
        self.columns.iter().find(|c| c.primary_key)
    }

    pub fn auto_increment_column(&self) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.auto_increment)
    }

    pub fn primary_index(&self) -> Option<&IndexInfo> {
        self.indices.iter().find(|i| i.primary)
    }

    pub fn contains_auto_random_bits(&self) -> bool {
        self.auto_random_bits > 0
    }

    /// Recompute column offsets after columns were inserted or removed.
    pub fn reset_offsets(&mut self) {
        for (offset, col) in self.columns.iter_mut().enumerate() {
            col.offset = offset;
        }
        let offsets: Vec<(String, usize)> = self
            .columns
            .iter()
            .map(|c| (c.name.l.clone(), c.offset))
            .collect();
        for index in &mut self.indices {
            for ic in &mut index.columns {
                if let Some((_, offset)) = offsets.iter().find(|(name, _)| *name == ic.name.l) {
                    ic.offset = *offset;
                }
            }
        }
    }

    /// Every placement policy referenced by the table or its partitions.
    pub fn policy_refs(&self) -> impl Iterator<Item = &PolicyRefInfo> {
        self.placement_policy_ref.iter().chain(
            self.partition
                .iter()
                .flat_map(|p| p.definitions.iter())
                .filter_map(|d| d.placement_policy_ref.as_ref()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_settings_validation() {
        let ok = PlacementSettings {
            primary_region: "r1".into(),
            regions: "r1,r2".into(),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let missing_regions = PlacementSettings {
            primary_region: "r1".into(),
            ..Default::default()
        };
        assert!(missing_regions.validate().is_err());

        let mixed = PlacementSettings {
            primary_region: "r1".into(),
            regions: "r1".into(),
            constraints: "[+disk=ssd]".into(),
            ..Default::default()
        };
        assert!(mixed.validate().is_err());
    }

    #[test]
    fn test_policy_refs_include_partitions() {
        let mut table = TableInfo::new(1, "t");
        table.placement_policy_ref = Some(PolicyRefInfo { id: 10, name: "p1".into() });
        table.partition = Some(PartitionInfo {
            tp: PartitionType::Range,
            expr: "a".into(),
            definitions: vec![PartitionDefinition {
                id: 2,
                name: "p0".into(),
                less_than: vec!["10".into()],
                in_values: vec![],
                placement_policy_ref: Some(PolicyRefInfo { id: 11, name: "p2".into() }),
            }],
        });
        let ids: Vec<i64> = table.policy_refs().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 11]);
    }
}
