//! Per-table ID allocators for row IDs, auto-increment and auto-random columns.
//!
//! Each allocator caches a `(base, end]` range reserved from the metadata
//! store so that most allocations never touch storage. Row IDs and
//! auto-increment values share one persisted counter (`AutoID:{table}`);
//! auto-random has its own (`AutoRandID:{table}`).

pub mod shard;

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AutoIdError, DdlError, Result};
use crate::kv::{StoreRef, run_in_new_txn};
use crate::meta::Meta;
use crate::model::TableInfo;

pub use shard::{ShardGenerator, ShardIdLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocatorType {
    RowId,
    AutoIncrement,
    AutoRandom,
}

/// Settings shared by every allocator a domain creates.
#[derive(Debug, Clone, Copy)]
pub struct AllocatorOptions {
    pub step: i64,
    pub txn_retry_limit: u32,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            step: 30_000,
            txn_retry_limit: 10,
        }
    }
}

#[derive(Debug, Default)]
struct CachedRange {
    /// Last value handed out (or rebased to).
    base: i64,
    /// Highest value reserved in storage for this cache.
    end: i64,
}

#[derive(Debug)]
pub struct Allocator {
    store: StoreRef,
    table_id: i64,
    tp: AllocatorType,
    step: i64,
    max_id: i64,
    txn_retry_limit: u32,
    range: Mutex<CachedRange>,
}

impl Allocator {
    pub fn new(store: StoreRef, table_id: i64, tp: AllocatorType, step: i64, max_id: i64, txn_retry_limit: u32) -> Self {
        Self {
            store,
            table_id,
            tp,
            step: step.max(1),
            max_id,
            txn_retry_limit,
            range: Mutex::new(CachedRange::default()),
        }
    }

    pub fn table_id(&self) -> i64 {
        self.table_id
    }

    pub fn alloc_type(&self) -> AllocatorType {
        self.tp
    }

    pub fn max_id(&self) -> i64 {
        self.max_id
    }

    fn lock(&self) -> MutexGuard<'_, CachedRange> {
        self.range.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn exhausted(&self) -> DdlError {
        match self.tp {
            AllocatorType::AutoRandom => AutoIdError::AutoRandReadFailed.into(),
            AllocatorType::RowId | AllocatorType::AutoIncrement => AutoIdError::AutoincReadFailed.into(),
        }
    }

    /// Reserve `n` consecutive values. Returns `(min, max)`; the values
    /// handed out are `min + 1 ..= max`.
    pub fn alloc(&self, n: u64) -> Result<(i64, i64)> {
        let n = i64::try_from(n).map_err(|_| self.exhausted())?;
        if n <= 0 {
            return Err(self.exhausted());
        }
        let mut range = self.lock();
        if range.base.saturating_add(n) > range.end {
            let step = self.step.max(n);
            let (table_id, tp, max_id) = (self.table_id, self.tp, self.max_id);
            let (new_base, new_end) = run_in_new_txn(&self.store, self.txn_retry_limit, |txn| {
                let mut m = Meta::new(txn);
                let current = m.get_auto_id(table_id, tp)?;
                let end = current.saturating_add(step).min(max_id);
                if end.saturating_sub(current) < n {
                    return Err(self.exhausted());
                }
                m.set_auto_id(table_id, tp, end);
                Ok((current, end))
            })?;
            debug!(table_id, ?tp, new_base, new_end, "auto id batch reserved");
            range.base = new_base;
            range.end = new_end;
        }
        let min = range.base;
        range.base += n;
        Ok((min, range.base))
    }

    pub fn alloc_one(&self) -> Result<i64> {
        self.alloc(1).map(|(_, max)| max)
    }

    /// Move the allocator so that later values exceed `required`.
    ///
    /// Never moves backwards: a concurrent rebase or a batch already reserved
    /// past `required` wins. With `alloc_ids` the new range is reserved at once.
    pub fn rebase(&self, required: i64, alloc_ids: bool) -> Result<()> {
        let mut range = self.lock();
        if required <= range.base {
            return Ok(());
        }
        if required <= range.end {
            range.base = required;
            return Ok(());
        }
        let (table_id, tp, step, max_id) = (self.table_id, self.tp, self.step, self.max_id);
        let (new_base, new_end) = run_in_new_txn(&self.store, self.txn_retry_limit, |txn| {
            let mut m = Meta::new(txn);
            let current = m.get_auto_id(table_id, tp)?;
            if !alloc_ids {
                let base = current.max(required);
                if base != current {
                    m.set_auto_id(table_id, tp, base);
                }
                return Ok((base, base));
            }
            let base = current.max(required);
            let end = base.saturating_add(step).min(max_id.max(base));
            m.set_auto_id(table_id, tp, end);
            Ok((base, end))
        })?;
        debug!(table_id, ?tp, required, new_base, new_end, "auto id rebased");
        range.base = new_base;
        range.end = new_end;
        Ok(())
    }

    /// Set the persisted base to exactly `base`, even when that moves it back.
    pub fn force_rebase(&self, base: i64) -> Result<()> {
        let mut range = self.lock();
        let (table_id, tp) = (self.table_id, self.tp);
        run_in_new_txn(&self.store, self.txn_retry_limit, |txn| {
            Meta::new(txn).set_auto_id(table_id, tp, base);
            Ok(())
        })?;
        range.base = base;
        range.end = base;
        Ok(())
    }

    /// Value the next allocation from any node would start after.
    pub fn next_global_auto_id(&self) -> Result<i64> {
        let (table_id, tp) = (self.table_id, self.tp);
        let current = run_in_new_txn(&self.store, self.txn_retry_limit, |txn| {
            Meta::new(txn).get_auto_id(table_id, tp)
        })?;
        Ok(current.saturating_add(1))
    }

    /// Locally cached base; 0 until the first allocation.
    pub fn base(&self) -> i64 {
        self.lock().base
    }
}

/// The allocators owned by one table in one InfoSchema generation.
#[derive(Debug, Clone)]
pub struct Allocators {
    row_id: Option<Arc<Allocator>>,
    auto_random: Option<Arc<Allocator>>,
    shard: Arc<ShardGenerator>,
}

impl Allocators {
    pub fn empty() -> Self {
        Self {
            row_id: None,
            auto_random: None,
            shard: Arc::new(ShardGenerator::default()),
        }
    }

    pub fn from_table_info(store: &StoreRef, table: &TableInfo, opts: AllocatorOptions) -> Self {
        let mut allocs = Self::empty();
        if !table.is_base_table() {
            return allocs;
        }
        allocs.row_id = Some(Arc::new(new_row_id_allocator(store, table, opts)));
        if table.contains_auto_random_bits() {
            allocs.auto_random = Some(Arc::new(new_auto_random_allocator(store, table, opts)));
        }
        allocs
    }

    /// Allocators for a new generation of `table`, keeping the cached state of
    /// every kind not listed in `invalidated`.
    pub fn rebuild(&self, store: &StoreRef, table: &TableInfo, opts: AllocatorOptions, invalidated: &[AllocatorType]) -> Self {
        let fresh = Self::from_table_info(store, table, opts);
        let keep = |tp: AllocatorType| !invalidated.contains(&tp);
        Self {
            row_id: match (&fresh.row_id, &self.row_id) {
                (Some(_), Some(old)) if keep(AllocatorType::RowId) && old.table_id == table.id => Some(old.clone()),
                _ => fresh.row_id,
            },
            auto_random: match (&fresh.auto_random, &self.auto_random) {
                (Some(_), Some(old)) if keep(AllocatorType::AutoRandom) && old.table_id == table.id => {
                    Some(old.clone())
                }
                _ => fresh.auto_random,
            },
            shard: self.shard.clone(),
        }
    }

    pub fn get(&self, tp: AllocatorType) -> Option<Arc<Allocator>> {
        match tp {
            AllocatorType::RowId | AllocatorType::AutoIncrement => self.row_id.clone(),
            AllocatorType::AutoRandom => self.auto_random.clone(),
        }
    }

    pub fn shard(&self) -> &ShardGenerator {
        &self.shard
    }
}

fn step_for(table: &TableInfo, opts: AllocatorOptions) -> i64 {
    if table.auto_id_cache > 0 {
        table.auto_id_cache
    } else {
        opts.step
    }
}

fn new_row_id_allocator(store: &StoreRef, table: &TableInfo, opts: AllocatorOptions) -> Allocator {
    let layout = ShardIdLayout::row_id(table.max_shard_row_id_bits);
    Allocator::new(
        store.clone(),
        table.id,
        AllocatorType::RowId,
        step_for(table, opts),
        layout.max_incremental(),
        opts.txn_retry_limit,
    )
}

fn new_auto_random_allocator(store: &StoreRef, table: &TableInfo, opts: AllocatorOptions) -> Allocator {
    Allocator::new(
        store.clone(),
        table.id,
        AllocatorType::AutoRandom,
        step_for(table, opts),
        auto_random_layout(table).max_incremental(),
        opts.txn_retry_limit,
    )
}

/// Shard layout of the table's auto-random primary key.
pub fn auto_random_layout(table: &TableInfo) -> ShardIdLayout {
    let unsigned = table
        .pk_handle_column()
        .is_some_and(|c| c.field_type.unsigned);
    ShardIdLayout::new(table.auto_random_range_bits, table.auto_random_bits, unsigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemStore;

    fn allocator(store: &StoreRef, step: i64, max_id: i64) -> Allocator {
        Allocator::new(store.clone(), 42, AllocatorType::RowId, step, max_id, 3)
    }

    #[test]
    fn test_alloc_is_dense_within_and_across_batches() {
        let store = MemStore::new_ref();
        let alloc = allocator(&store, 3, i64::MAX);
        let ids: Vec<i64> = (0..7).map(|_| alloc.alloc_one().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(alloc.next_global_auto_id().unwrap(), 10);
    }

    #[test]
    fn test_allocator_debug_shows_store_and_range() {
        let store = MemStore::new_ref();
        let alloc = allocator(&store, 3, i64::MAX);
        alloc.alloc_one().unwrap();
        let text = format!("{alloc:?}");
        assert!(text.contains("MemStore"));
        assert!(text.contains("table_id: 42"));
        assert!(text.contains("end: 3"));
    }

    #[test]
    fn test_two_allocators_never_overlap() {
        let store = MemStore::new_ref();
        let a = allocator(&store, 10, i64::MAX);
        let b = allocator(&store, 10, i64::MAX);
        assert_eq!(a.alloc_one().unwrap(), 1);
        assert_eq!(b.alloc_one().unwrap(), 11);
        assert_eq!(a.alloc_one().unwrap(), 2);
    }

    #[test]
    fn test_rebase_is_max_wins() {
        let store = MemStore::new_ref();
        let alloc = allocator(&store, 100, i64::MAX);
        alloc.alloc_one().unwrap();
        alloc.rebase(50, false).unwrap();
        assert_eq!(alloc.alloc_one().unwrap(), 51);
        alloc.rebase(10, false).unwrap();
        assert_eq!(alloc.alloc_one().unwrap(), 52);
        alloc.rebase(5000, true).unwrap();
        assert_eq!(alloc.alloc_one().unwrap(), 5001);

        let other = allocator(&store, 100, i64::MAX);
        other.rebase(200, false).unwrap();
        assert!(other.alloc_one().unwrap() > 5000);
    }

    #[test]
    fn test_force_rebase_moves_back() {
        let store = MemStore::new_ref();
        let alloc = allocator(&store, 100, i64::MAX);
        alloc.rebase(1000, true).unwrap();
        alloc.force_rebase(10).unwrap();
        assert_eq!(alloc.alloc_one().unwrap(), 11);
    }

    #[test]
    fn test_exhaustion() {
        let store = MemStore::new_ref();
        let alloc = allocator(&store, 100, 5);
        for expected in 1..=5 {
            assert_eq!(alloc.alloc_one().unwrap(), expected);
        }
        let err = alloc.alloc_one().unwrap_err();
        assert_eq!(err.code(), 1467);

        let rand = Allocator::new(store.clone(), 43, AllocatorType::AutoRandom, 10, 2, 3);
        rand.alloc(2).unwrap();
        assert_eq!(rand.alloc_one().unwrap_err().code(), 8228);
    }

    #[test]
    fn test_rebuild_keeps_unlisted_allocators() {
        let store = MemStore::new_ref();
        let mut table = TableInfo::new(7, "t");
        table.auto_random_bits = 5;
        let opts = AllocatorOptions { step: 10, txn_retry_limit: 3 };
        let allocs = Allocators::from_table_info(&store, &table, opts);
        allocs.get(AllocatorType::RowId).unwrap().alloc_one().unwrap();
        allocs.get(AllocatorType::AutoRandom).unwrap().alloc_one().unwrap();

        let next = allocs.rebuild(&store, &table, opts, &[AllocatorType::AutoRandom]);
        assert!(Arc::ptr_eq(
            &next.get(AllocatorType::AutoIncrement).unwrap(),
            &allocs.get(AllocatorType::RowId).unwrap()
        ));
        assert!(!Arc::ptr_eq(
            &next.get(AllocatorType::AutoRandom).unwrap(),
            &allocs.get(AllocatorType::AutoRandom).unwrap()
        ));
        assert_eq!(next.get(AllocatorType::AutoRandom).unwrap().alloc_one().unwrap(), 11);
    }
}
