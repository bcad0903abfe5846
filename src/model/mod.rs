//! Schema object and job records persisted in the metadata store.

mod expr;
mod job;
mod schema;
mod types;

pub use expr::{BinaryOp, DETERMINISTIC_FUNCTIONS, Expr};
pub use job::{
    ActionType, AffectedOption, ColumnPosition, HistoryInfo, Job, JobArgs, JobLease, JobState,
    RenameEntry, SchemaDiff,
};
pub use schema::{
    AUTO_RANDOM_RANGE_BITS_DEFAULT, ColumnInfo, DatabaseInfo, DefaultValue, GeneratedColumn,
    IndexColumn, IndexInfo, PartitionDefinition, PartitionInfo, PartitionType, PlacementSettings,
    PolicyInfo, PolicyRefInfo, SequenceInfo, TableInfo, TableKind, TableRef, ViewInfo,
};
pub use types::{CIStr, ColumnType, Datum, FieldType, SchemaState, TypeClass};
