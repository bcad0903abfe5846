//! Transactional key-value storage consumed by the metadata store and the
//! record layer.
//!
//! `MemStore` keeps every committed version of a key so that snapshot reads at
//! an older timestamp stay consistent. Transactions buffer writes locally and
//! validate optimistically at commit: any key read or written by the
//! transaction that gained a newer version after `start_ts` aborts the commit
//! with a write conflict.

pub mod codec;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::errors::{DdlError, KvError, Result};

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

/// Shared handle to a storage engine.
pub type StoreRef = Arc<dyn Storage>;

/// Storage engine interface: snapshot reads plus conditional commit.
pub trait Storage: fmt::Debug + Send + Sync {
    /// Timestamp of the newest committed write; a read at this timestamp
    /// observes every committed transaction.
    fn current_ts(&self) -> u64;

    fn get_at(&self, key: &[u8], ts: u64) -> Option<Value>;

    /// All live keys starting with `prefix`, in key order, as of `ts`.
    fn scan_at(&self, prefix: &[u8], ts: u64) -> Vec<(Key, Value)>;

    /// Atomically apply `writes` if nothing in `reads`, `read_prefixes` or
    /// `writes` changed after `start_ts`. Returns the commit timestamp.
    fn commit(
        &self,
        start_ts: u64,
        reads: &BTreeSet<Key>,
        read_prefixes: &[Key],
        writes: BTreeMap<Key, Option<Value>>,
    ) -> Result<u64>;
}

#[derive(Default)]
struct MemInner {
    data: BTreeMap<Key, Vec<(u64, Option<Value>)>>,
    ts: u64,
}

/// In-process multi-version store.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_ref() -> StoreRef {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, MemInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop versions no reader at or after `safe_ts` can observe.
    pub fn compact(&self, safe_ts: u64) -> usize {
        let mut inner = self.lock();
        let mut removed = 0;
        inner.data.retain(|_, versions| {
            let visible = versions.iter().rposition(|(ts, _)| *ts <= safe_ts);
            if let Some(pos) = visible {
                removed += pos;
                versions.drain(..pos);
            }
            let tombstone_only = versions.len() == 1 && versions[0].1.is_none();
            if tombstone_only {
                removed += 1;
            }
            !tombstone_only
        });
        removed
    }
}

impl fmt::Debug for MemStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemStore")
            .field("keys", &inner.data.len())
            .field("ts", &inner.ts)
            .finish()
    }
}

fn visible(versions: &[(u64, Option<Value>)], ts: u64) -> Option<&Value> {
    versions
        .iter()
        .rev()
        .find(|(v, _)| *v <= ts)
        .and_then(|(_, value)| value.as_ref())
}

fn latest_ts(versions: &[(u64, Option<Value>)]) -> u64 {
    versions.last().map(|(ts, _)| *ts).unwrap_or(0)
}

impl Storage for MemStore {
    fn current_ts(&self) -> u64 {
        self.lock().ts
    }

    fn get_at(&self, key: &[u8], ts: u64) -> Option<Value> {
        let inner = self.lock();
        inner.data.get(key).and_then(|versions| visible(versions, ts).cloned())
    }

    fn scan_at(&self, prefix: &[u8], ts: u64) -> Vec<(Key, Value)> {
        let inner = self.lock();
        inner
            .data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter_map(|(k, versions)| visible(versions, ts).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    fn commit(
        &self,
        start_ts: u64,
        reads: &BTreeSet<Key>,
        read_prefixes: &[Key],
        writes: BTreeMap<Key, Option<Value>>,
    ) -> Result<u64> {
        let mut inner = self.lock();

        let conflict = |key: &[u8], ts: u64| -> DdlError {
            KvError::WriteConflict {
                start_ts,
                conflict_ts: ts,
                key: String::from_utf8_lossy(key).into_owned(),
            }
            .into()
        };

        for key in reads.iter().chain(writes.keys()) {
            if let Some(versions) = inner.data.get(key) {
                let ts = latest_ts(versions);
                if ts > start_ts {
                    return Err(conflict(key, ts));
                }
            }
        }
        for prefix in read_prefixes {
            let changed = inner
                .data
                .range::<[u8], _>((Bound::Included(prefix.as_slice()), Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(prefix))
                .find(|(_, versions)| latest_ts(versions) > start_ts);
            if let Some((key, versions)) = changed {
                return Err(conflict(key, latest_ts(versions)));
            }
        }

        inner.ts += 1;
        let commit_ts = inner.ts;
        for (key, value) in writes {
            inner.data.entry(key).or_default().push((commit_ts, value));
        }
        Ok(commit_ts)
    }
}

/// Read-only view pinned at a timestamp.
pub struct Snapshot {
    store: StoreRef,
    ts: u64,
}

impl Snapshot {
    pub fn new(store: StoreRef, ts: u64) -> Self {
        Self { store, ts }
    }

    pub fn ts(&self) -> u64 {
        self.ts
    }

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.store.get_at(key, self.ts)
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Key, Value)> {
        self.store.scan_at(prefix, self.ts)
    }
}

/// Optimistic transaction. Dropping it without `commit` discards all writes.
pub struct Transaction {
    store: StoreRef,
    start_ts: u64,
    writes: BTreeMap<Key, Option<Value>>,
    reads: BTreeSet<Key>,
    read_prefixes: Vec<Key>,
}

impl Transaction {
    pub fn begin(store: StoreRef) -> Self {
        let start_ts = store.current_ts();
        Self {
            store,
            start_ts,
            writes: BTreeMap::new(),
            reads: BTreeSet::new(),
            read_prefixes: Vec::new(),
        }
    }

    pub fn start_ts(&self) -> u64 {
        self.start_ts
    }

    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Value> {
        if let Some(buffered) = self.writes.get(key) {
            return buffered.clone();
        }
        self.reads.insert(key.to_vec());
        self.store.get_at(key, self.start_ts)
    }

    pub fn set(&mut self, key: Key, value: Value) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Key) {
        self.writes.insert(key, None);
    }

    /// Merge of committed keys and the local write buffer under `prefix`.
    pub fn scan_prefix(&mut self, prefix: &[u8]) -> Vec<(Key, Value)> {
        self.read_prefixes.push(prefix.to_vec());
        let mut merged: BTreeMap<Key, Value> = self
            .store
            .scan_at(prefix, self.start_ts)
            .into_iter()
            .collect();
        for (key, value) in self
            .writes
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }

    /// Delete every key under `prefix`; returns how many were removed.
    pub fn delete_prefix(&mut self, prefix: &[u8]) -> usize {
        let keys: Vec<Key> = self.scan_prefix(prefix).into_iter().map(|(k, _)| k).collect();
        let count = keys.len();
        for key in keys {
            self.delete(key);
        }
        count
    }

    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn commit(self) -> Result<u64> {
        if self.writes.is_empty() {
            return Ok(self.start_ts);
        }
        let writes = self.writes.len();
        let commit_ts = self
            .store
            .commit(self.start_ts, &self.reads, &self.read_prefixes, self.writes)?;
        trace!(start_ts = self.start_ts, commit_ts, writes, "transaction committed");
        Ok(commit_ts)
    }
}

/// Run `f` in a fresh transaction and commit it, retrying on write conflicts.
pub fn run_in_new_txn<T, F>(store: &StoreRef, retry_limit: u32, mut f: F) -> Result<T>
where
    F: FnMut(&mut Transaction) -> Result<T>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut txn = Transaction::begin(store.clone());
        let value = f(&mut txn)?;
        match txn.commit() {
            Ok(_) => return Ok(value),
            Err(DdlError::Kv(KvError::WriteConflict { key, .. })) if attempt <= retry_limit => {
                debug!(attempt, %key, "write conflict, retrying transaction");
            }
            Err(e) => return Err(e),
        }
    }
}
