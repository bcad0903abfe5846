use std::sync::{Arc, RwLock};

use crate::infoschema::InfoSchema;

/// A cached generation plus the lowest version it was loaded from. Versions
/// in `[loaded_from, version)` were skipped by a catch-up, so the older
/// cached generation does not describe them.
#[derive(Debug)]
struct Entry {
    is: Arc<InfoSchema>,
    loaded_from: i64,
}

/// Recent InfoSchema generations, newest first.
#[derive(Debug)]
pub struct InfoCache {
    capacity: usize,
    cache: RwLock<Vec<Entry>>,
}

impl InfoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            cache: RwLock::new(Vec::new()),
        }
    }

    pub fn get_latest(&self) -> Option<Arc<InfoSchema>> {
        self.read().first().map(|entry| entry.is.clone())
    }

    /// Newest cached generation with version <= `version`. `None` when
    /// `version` predates everything still cached or falls in a range a
    /// catch-up skipped.
    pub fn get_by_version(&self, version: i64) -> Option<Arc<InfoSchema>> {
        let cache = self.read();
        let pos = cache.iter().position(|entry| entry.is.schema_meta_version() <= version)?;
        if pos > 0 && version >= cache[pos - 1].loaded_from {
            return None;
        }
        Some(cache[pos].is.clone())
    }

    /// Insert a generation that directly follows the previous version.
    /// Returns false when the version is already cached.
    pub fn insert(&self, is: Arc<InfoSchema>) -> bool {
        let version = is.schema_meta_version();
        self.insert_entry(Entry { is, loaded_from: version })
    }

    /// Insert a generation reached from `base_version` in one step; the
    /// versions in between are not answerable from the cache.
    pub fn insert_catch_up(&self, is: Arc<InfoSchema>, base_version: i64) -> bool {
        let loaded_from = (base_version + 1).min(is.schema_meta_version());
        self.insert_entry(Entry { is, loaded_from })
    }

    fn insert_entry(&self, entry: Entry) -> bool {
        let mut cache = self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let version = entry.is.schema_meta_version();
        let pos = cache.partition_point(|cached| cached.is.schema_meta_version() > version);
        if cache
            .get(pos)
            .is_some_and(|cached| cached.is.schema_meta_version() == version)
        {
            return false;
        }
        cache.insert(pos, entry);
        cache.truncate(self.capacity);
        true
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn reset(&self) {
        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Entry>> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
