//! Transactional metadata store.
//!
//! All schema objects, counters and the DDL job queue live under the `m` prefix
//! of the shared keyspace. Each record is JSON; counters are decimal strings.
//! Name index keys (`DBName`, `TableName`, `PolicyName`) hold the owning ID and
//! are what enforces name uniqueness within a parent scope.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::autoid::AllocatorType;
use crate::errors::{MetaError, PlacementError, Result, SchemaError};
use crate::kv::{Key, Transaction};
use crate::model::{DatabaseInfo, Job, PolicyInfo, SchemaDiff, TableInfo};

const NEXT_GLOBAL_ID: &str = "mNextGlobalID";
const SCHEMA_VERSION: &str = "mSchemaVersion";
const BOOTSTRAPPED: &str = "mBootstrapped";
const DB_PREFIX: &str = "mDB:";
const DB_NAME_PREFIX: &str = "mDBName:";
const TABLE_PREFIX: &str = "mTable:";
const TABLE_NAME_PREFIX: &str = "mTableName:";
const POLICY_PREFIX: &str = "mPolicy:";
const POLICY_NAME_PREFIX: &str = "mPolicyName:";
const DIFF_PREFIX: &str = "mDiff:";
const JOB_QUEUE_PREFIX: &str = "mDDLJobQueue:";
const JOB_HISTORY_PREFIX: &str = "mDDLJobHistory:";
const JOB_REORG_PREFIX: &str = "mDDLJobReorg:";
const AUTO_ID_PREFIX: &str = "mAutoID:";
const AUTO_RAND_ID_PREFIX: &str = "mAutoRandID:";

fn db_key(db_id: i64) -> Key {
    format!("{}{:020}", DB_PREFIX, db_id).into_bytes()
}

fn db_name_key(name: &str) -> Key {
    format!("{}{}", DB_NAME_PREFIX, name.to_lowercase()).into_bytes()
}

fn table_prefix(db_id: i64) -> Key {
    format!("{}{:020}:", TABLE_PREFIX, db_id).into_bytes()
}

fn table_key(db_id: i64, table_id: i64) -> Key {
    format!("{}{:020}:{:020}", TABLE_PREFIX, db_id, table_id).into_bytes()
}

fn table_name_key(db_id: i64, name: &str) -> Key {
    format!("{}{:020}:{}", TABLE_NAME_PREFIX, db_id, name.to_lowercase()).into_bytes()
}

fn table_name_prefix(db_id: i64) -> Key {
    format!("{}{:020}:", TABLE_NAME_PREFIX, db_id).into_bytes()
}

fn policy_key(policy_id: i64) -> Key {
    format!("{}{:020}", POLICY_PREFIX, policy_id).into_bytes()
}

fn policy_name_key(name: &str) -> Key {
    format!("{}{}", POLICY_NAME_PREFIX, name.to_lowercase()).into_bytes()
}

fn diff_key(version: i64) -> Key {
    format!("{}{:020}", DIFF_PREFIX, version).into_bytes()
}

fn job_queue_key(job_id: i64) -> Key {
    format!("{}{:020}", JOB_QUEUE_PREFIX, job_id).into_bytes()
}

fn job_history_key(job_id: i64) -> Key {
    format!("{}{:020}", JOB_HISTORY_PREFIX, job_id).into_bytes()
}

fn job_reorg_key(job_id: i64) -> Key {
    format!("{}{:020}", JOB_REORG_PREFIX, job_id).into_bytes()
}

fn auto_id_key(table_id: i64, tp: AllocatorType) -> Key {
    let prefix = match tp {
        AllocatorType::RowId | AllocatorType::AutoIncrement => AUTO_ID_PREFIX,
        AllocatorType::AutoRandom => AUTO_RAND_ID_PREFIX,
    };
    format!("{}{:020}", prefix, table_id).into_bytes()
}

/// Metadata accessor bound to one transaction.
pub struct Meta<'a> {
    txn: &'a mut Transaction,
}

impl<'a> Meta<'a> {
    pub fn new(txn: &'a mut Transaction) -> Self {
        Self { txn }
    }

    pub fn txn(&mut self) -> &mut Transaction {
        self.txn
    }

    fn get_json<T: DeserializeOwned>(&mut self, key: &[u8]) -> Result<Option<T>> {
        match self.txn.get(key) {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                MetaError::Corrupt {
                    key: String::from_utf8_lossy(key).into_owned(),
                    reason: e.to_string(),
                }
                .into()
            }),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&mut self, key: Key, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.txn.set(key, bytes);
        Ok(())
    }

    fn scan_json<T: DeserializeOwned>(&mut self, prefix: &[u8]) -> Result<Vec<T>> {
        self.txn
            .scan_prefix(prefix)
            .into_iter()
            .map(|(key, bytes)| {
                serde_json::from_slice(&bytes).map_err(|e| {
                    MetaError::Corrupt {
                        key: String::from_utf8_lossy(&key).into_owned(),
                        reason: e.to_string(),
                    }
                    .into()
                })
            })
            .collect()
    }

    fn get_i64(&mut self, key: &[u8]) -> Result<i64> {
        match self.txn.get(key) {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    MetaError::Corrupt {
                        key: String::from_utf8_lossy(key).into_owned(),
                        reason: "not an integer".to_string(),
                    }
                    .into()
                }),
            None => Ok(0),
        }
    }

    fn set_i64(&mut self, key: Key, value: i64) {
        self.txn.set(key, value.to_string().into_bytes());
    }

    fn inc_i64(&mut self, key: &[u8], step: i64) -> Result<i64> {
        let value = self.get_i64(key)?.saturating_add(step);
        self.set_i64(key.to_vec(), value);
        Ok(value)
    }

    // ---- global counters ----

    /// Allocate `n` contiguous, never-reused object IDs.
    pub fn gen_global_ids(&mut self, n: usize) -> Result<Vec<i64>> {
        let end = self.inc_i64(NEXT_GLOBAL_ID.as_bytes(), n as i64)?;
        let start = end - n as i64 + 1;
        Ok((start..=end).collect())
    }

    pub fn gen_global_id(&mut self) -> Result<i64> {
        self.inc_i64(NEXT_GLOBAL_ID.as_bytes(), 1)
    }

    pub fn get_global_id(&mut self) -> Result<i64> {
        self.get_i64(NEXT_GLOBAL_ID.as_bytes())
    }

    pub fn gen_schema_version(&mut self) -> Result<i64> {
        let version = self.inc_i64(SCHEMA_VERSION.as_bytes(), 1)?;
        debug!(schema_version = version, "schema version bumped");
        Ok(version)
    }

    pub fn get_schema_version(&mut self) -> Result<i64> {
        self.get_i64(SCHEMA_VERSION.as_bytes())
    }

    pub fn set_schema_diff(&mut self, diff: &SchemaDiff) -> Result<()> {
        self.put_json(diff_key(diff.version), diff)
    }

    pub fn get_schema_diff(&mut self, version: i64) -> Result<Option<SchemaDiff>> {
        self.get_json(&diff_key(version))
    }

    pub fn is_bootstrapped(&mut self) -> bool {
        self.txn.get(BOOTSTRAPPED.as_bytes()).is_some()
    }

    pub fn set_bootstrapped(&mut self) {
        self.txn.set(BOOTSTRAPPED.as_bytes().to_vec(), b"1".to_vec());
    }

    // ---- databases ----

    pub fn create_database(&mut self, db: &DatabaseInfo) -> Result<()> {
        let name_key = db_name_key(&db.name.l);
        if self.txn.get(&name_key).is_some() {
            return Err(SchemaError::DatabaseExists { name: db.name.o.clone() }.into());
        }
        self.set_i64(name_key, db.id);
        self.put_json(db_key(db.id), db)
    }

    pub fn update_database(&mut self, db: &DatabaseInfo) -> Result<()> {
        self.check_db_exists(db.id)?;
        self.put_json(db_key(db.id), db)
    }

    /// Remove the database together with every table it owns.
    pub fn drop_database(&mut self, db_id: i64) -> Result<Vec<TableInfo>> {
        let db = self.get_database(db_id)?.ok_or(MetaError::DatabaseNotExists(db_id))?;
        let tables = self.list_tables(db_id)?;
        for table in &tables {
            self.drop_table(db_id, table.id, true)?;
        }
        self.txn.delete(db_name_key(&db.name.l));
        self.txn.delete(db_key(db_id));
        Ok(tables)
    }

    pub fn get_database(&mut self, db_id: i64) -> Result<Option<DatabaseInfo>> {
        self.get_json(&db_key(db_id))
    }

    pub fn get_database_by_name(&mut self, name: &str) -> Result<Option<DatabaseInfo>> {
        let key = db_name_key(name);
        if self.txn.get(&key).is_none() {
            return Ok(None);
        }
        let id = self.get_i64(&key)?;
        self.get_database(id)
    }

    pub fn list_databases(&mut self) -> Result<Vec<DatabaseInfo>> {
        self.scan_json(DB_PREFIX.as_bytes())
    }

    fn check_db_exists(&mut self, db_id: i64) -> Result<()> {
        if self.txn.get(&db_key(db_id)).is_none() {
            return Err(MetaError::DatabaseNotExists(db_id).into());
        }
        Ok(())
    }

    // ---- tables ----

    pub fn create_table(&mut self, db_id: i64, table: &TableInfo) -> Result<()> {
        let db = self.get_database(db_id)?.ok_or(MetaError::DatabaseNotExists(db_id))?;
        let name_key = table_name_key(db_id, &table.name.l);
        if self.txn.get(&name_key).is_some() {
            return Err(SchemaError::TableExists {
                schema: db.name.o,
                table: table.name.o.clone(),
            }
            .into());
        }
        self.set_i64(name_key, table.id);
        self.put_json(table_key(db_id, table.id), table)
    }

    pub fn update_table(&mut self, db_id: i64, table: &TableInfo) -> Result<()> {
        self.check_table_exists(db_id, table.id)?;
        self.put_json(table_key(db_id, table.id), table)
    }

    /// Remove the table record and its name entry; `drop_auto_ids` also clears
    /// the persisted allocator bases.
    pub fn drop_table(&mut self, db_id: i64, table_id: i64, drop_auto_ids: bool) -> Result<TableInfo> {
        let table = self
            .get_table(db_id, table_id)?
            .ok_or(MetaError::TableNotExists { db_id, table_id })?;
        self.txn.delete(table_name_key(db_id, &table.name.l));
        self.txn.delete(table_key(db_id, table_id));
        if drop_auto_ids {
            self.txn.delete(auto_id_key(table_id, AllocatorType::RowId));
            self.txn.delete(auto_id_key(table_id, AllocatorType::AutoRandom));
        }
        Ok(table)
    }

    /// Move `table` (already carrying its new name) from `old_db_id` to `new_db_id`.
    pub fn rename_table(&mut self, old_db_id: i64, new_db_id: i64, table: &TableInfo) -> Result<()> {
        let old = self
            .get_table(old_db_id, table.id)?
            .ok_or(MetaError::TableNotExists { db_id: old_db_id, table_id: table.id })?;
        self.txn.delete(table_name_key(old_db_id, &old.name.l));
        self.txn.delete(table_key(old_db_id, table.id));
        self.create_table(new_db_id, table)
    }

    pub fn get_table(&mut self, db_id: i64, table_id: i64) -> Result<Option<TableInfo>> {
        self.get_json(&table_key(db_id, table_id))
    }

    pub fn get_table_by_name(&mut self, db_id: i64, name: &str) -> Result<Option<TableInfo>> {
        let key = table_name_key(db_id, name);
        if self.txn.get(&key).is_none() {
            return Ok(None);
        }
        let id = self.get_i64(&key)?;
        self.get_table(db_id, id)
    }

    pub fn table_name_exists(&mut self, db_id: i64, name: &str) -> bool {
        self.txn.get(&table_name_key(db_id, name)).is_some()
    }

    pub fn list_tables(&mut self, db_id: i64) -> Result<Vec<TableInfo>> {
        self.scan_json(&table_prefix(db_id))
    }

    /// Number of name index entries under a database; used by consistency checks.
    pub fn count_table_names(&mut self, db_id: i64) -> usize {
        self.txn.scan_prefix(&table_name_prefix(db_id)).len()
    }

    fn check_table_exists(&mut self, db_id: i64, table_id: i64) -> Result<()> {
        self.check_db_exists(db_id)?;
        if self.txn.get(&table_key(db_id, table_id)).is_none() {
            return Err(MetaError::TableNotExists { db_id, table_id }.into());
        }
        Ok(())
    }

    // ---- placement policies ----

    pub fn create_policy(&mut self, policy: &PolicyInfo) -> Result<()> {
        let name_key = policy_name_key(&policy.name.l);
        if self.txn.get(&name_key).is_some() {
            return Err(PlacementError::PolicyExists(policy.name.o.clone()).into());
        }
        self.set_i64(name_key, policy.id);
        self.put_json(policy_key(policy.id), policy)
    }

    pub fn update_policy(&mut self, policy: &PolicyInfo) -> Result<()> {
        if self.txn.get(&policy_key(policy.id)).is_none() {
            return Err(MetaError::PolicyNotExists(policy.id).into());
        }
        self.put_json(policy_key(policy.id), policy)
    }

    pub fn drop_policy(&mut self, policy_id: i64) -> Result<PolicyInfo> {
        let policy = self
            .get_policy(policy_id)?
            .ok_or(MetaError::PolicyNotExists(policy_id))?;
        self.txn.delete(policy_name_key(&policy.name.l));
        self.txn.delete(policy_key(policy_id));
        Ok(policy)
    }

    pub fn get_policy(&mut self, policy_id: i64) -> Result<Option<PolicyInfo>> {
        self.get_json(&policy_key(policy_id))
    }

    pub fn get_policy_by_name(&mut self, name: &str) -> Result<Option<PolicyInfo>> {
        let key = policy_name_key(name);
        if self.txn.get(&key).is_none() {
            return Ok(None);
        }
        let id = self.get_i64(&key)?;
        self.get_policy(id)
    }

    pub fn list_policies(&mut self) -> Result<Vec<PolicyInfo>> {
        self.scan_json(POLICY_PREFIX.as_bytes())
    }

    // ---- auto IDs ----

    pub fn get_auto_id(&mut self, table_id: i64, tp: AllocatorType) -> Result<i64> {
        self.get_i64(&auto_id_key(table_id, tp))
    }

    pub fn set_auto_id(&mut self, table_id: i64, tp: AllocatorType, value: i64) {
        self.set_i64(auto_id_key(table_id, tp), value);
    }

    /// Advance the persisted base by `step` and return the new end.
    pub fn gen_auto_id(&mut self, table_id: i64, tp: AllocatorType, step: i64) -> Result<i64> {
        self.inc_i64(&auto_id_key(table_id, tp), step)
    }

    // ---- job queue ----

    pub fn enqueue_job(&mut self, job: &Job) -> Result<()> {
        self.put_json(job_queue_key(job.id), job)
    }

    pub fn update_job(&mut self, job: &Job) -> Result<()> {
        self.put_json(job_queue_key(job.id), job)
    }

    /// Queued jobs in submission order.
    pub fn queued_jobs(&mut self) -> Result<Vec<Job>> {
        self.scan_json(JOB_QUEUE_PREFIX.as_bytes())
    }

    pub fn get_queued_job(&mut self, job_id: i64) -> Result<Option<Job>> {
        self.get_json(&job_queue_key(job_id))
    }

    /// Move a finished job from the queue into history.
    pub fn finish_job(&mut self, job: &Job) -> Result<()> {
        self.txn.delete(job_queue_key(job.id));
        self.txn.delete(job_reorg_key(job.id));
        self.put_json(job_history_key(job.id), job)
    }

    pub fn get_history_job(&mut self, job_id: i64) -> Result<Option<Job>> {
        self.get_json(&job_history_key(job_id))
    }

    /// Most recent history jobs first.
    pub fn history_jobs(&mut self, limit: usize) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.scan_json(JOB_HISTORY_PREFIX.as_bytes())?;
        jobs.reverse();
        jobs.truncate(limit);
        Ok(jobs)
    }

    // ---- reorg checkpoints ----

    pub fn set_reorg_info<T: Serialize>(&mut self, job_id: i64, info: &T) -> Result<()> {
        self.put_json(job_reorg_key(job_id), info)
    }

    pub fn get_reorg_info<T: DeserializeOwned>(&mut self, job_id: i64) -> Result<Option<T>> {
        self.get_json(&job_reorg_key(job_id))
    }

    pub fn remove_reorg_info(&mut self, job_id: i64) {
        self.txn.delete(job_reorg_key(job_id));
    }
}
