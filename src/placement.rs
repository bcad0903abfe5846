//! Placement policy reference checks.
//!
//! A policy may only be dropped when no database, table or partition refers
//! to it. The check runs either against an InfoSchema snapshot or against the
//! metadata store inside a job transaction; both scan the same references.

use crate::errors::{PlacementError, Result};
use crate::infoschema::InfoSchema;
use crate::meta::Meta;
use crate::model::{DatabaseInfo, PolicyInfo, TableInfo};

fn database_refers(db: &DatabaseInfo, policy_id: i64) -> bool {
    db.placement_policy_ref
        .as_ref()
        .is_some_and(|r| r.id == policy_id)
}

fn table_refers(table: &TableInfo, policy_id: i64) -> bool {
    table.policy_refs().any(|r| r.id == policy_id)
}

fn check_refs<'a>(
    policy: &PolicyInfo,
    mut dbs: impl Iterator<Item = &'a DatabaseInfo>,
    mut tables: impl Iterator<Item = &'a TableInfo>,
) -> Result<()> {
    let in_use = dbs.any(|db| database_refers(db, policy.id))
        || tables.any(|t| table_refers(t, policy.id));
    if in_use {
        return Err(PlacementError::PolicyInUse(policy.name.o.clone()).into());
    }
    Ok(())
}

pub fn check_policy_not_in_use_from_info_schema(is: &InfoSchema, policy: &PolicyInfo) -> Result<()> {
    check_refs(policy, is.all_databases(), is.all_tables())
}

pub fn check_policy_not_in_use_from_meta(m: &mut Meta<'_>, policy: &PolicyInfo) -> Result<()> {
    let dbs = m.list_databases()?;
    let mut tables = Vec::new();
    for db in &dbs {
        tables.extend(m.list_tables(db.id)?);
    }
    check_refs(policy, dbs.iter(), tables.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoid::AllocatorOptions;
    use crate::infoschema::Builder;
    use crate::kv::{MemStore, run_in_new_txn};
    use crate::model::{
        PartitionDefinition, PartitionInfo, PartitionType, PlacementSettings, PolicyRefInfo, SchemaState,
    };

    fn policy(id: i64, name: &str) -> PolicyInfo {
        PolicyInfo {
            id,
            name: name.into(),
            settings: PlacementSettings::default(),
            state: SchemaState::Public,
        }
    }

    #[test]
    fn test_partition_reference_blocks_drop_in_both_views() {
        let store = MemStore::new_ref();
        let p1 = policy(5, "p1");
        let p2 = policy(6, "p2");
        run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            m.create_policy(&p1)?;
            m.create_policy(&p2)?;
            m.create_database(&DatabaseInfo::new(1, "test", "utf8mb4", "utf8mb4_bin"))?;
            let mut t = TableInfo::new(2, "t");
            t.partition = Some(PartitionInfo {
                tp: PartitionType::Range,
                expr: "a".into(),
                definitions: vec![PartitionDefinition {
                    id: 3,
                    name: "p0".into(),
                    less_than: vec!["100".into()],
                    in_values: vec![],
                    placement_policy_ref: Some(PolicyRefInfo { id: 5, name: "p1".into() }),
                }],
            });
            m.create_table(1, &t)
        })
        .unwrap();

        run_in_new_txn(&store, 3, |txn| {
            let mut m = Meta::new(txn);
            let err = check_policy_not_in_use_from_meta(&mut m, &p1).unwrap_err();
            assert_eq!(err.to_string(), "[ddl:8241]Placement policy 'p1' is still in use");
            assert!(check_policy_not_in_use_from_meta(&mut m, &p2).is_ok());

            let is = Builder::new(store.clone(), AllocatorOptions::default())
                .load_full(&mut m)?
                .build();
            assert_eq!(check_policy_not_in_use_from_info_schema(&is, &p1).unwrap_err().code(), 8241);
            assert!(check_policy_not_in_use_from_info_schema(&is, &p2).is_ok());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_database_default_reference() {
        let mut db = DatabaseInfo::new(1, "d", "utf8mb4", "utf8mb4_bin");
        db.placement_policy_ref = Some(PolicyRefInfo { id: 9, name: "p".into() });
        let p = policy(9, "p");
        assert!(check_refs(&p, std::iter::once(&db), std::iter::empty()).is_err());
    }
}
