//! Runtime-adjustable backfill tunables.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use tracing::info;

use crate::config::ReorgConfig;
use crate::errors::SqlWarning;

pub const DEF_DDL_REORG_WORKER_COUNT: i32 = 4;
pub const MAX_DDL_REORG_WORKER_COUNT: i32 = 256;
pub const DEF_DDL_REORG_BATCH_SIZE: i32 = 256;
pub const MIN_DDL_REORG_BATCH_SIZE: i32 = 32;
pub const MAX_DDL_REORG_BATCH_SIZE: i32 = 10240;
pub const DEF_DDL_ERROR_COUNT_LIMIT: i64 = 512;

pub const TIDB_DDL_REORG_WORKER_CNT: &str = "tidb_ddl_reorg_worker_cnt";
pub const TIDB_DDL_REORG_BATCH_SIZE: &str = "tidb_ddl_reorg_batch_size";
pub const TIDB_DDL_ERROR_COUNT_LIMIT: &str = "tidb_ddl_error_count_limit";

#[derive(Debug)]
pub struct DdlVars {
    reorg_worker_cnt: AtomicI32,
    reorg_batch_size: AtomicI32,
    error_count_limit: AtomicI64,
}

impl Default for DdlVars {
    fn default() -> Self {
        Self {
            reorg_worker_cnt: AtomicI32::new(DEF_DDL_REORG_WORKER_COUNT),
            reorg_batch_size: AtomicI32::new(DEF_DDL_REORG_BATCH_SIZE),
            error_count_limit: AtomicI64::new(DEF_DDL_ERROR_COUNT_LIMIT),
        }
    }
}

fn truncated(name: &str, value: i64) -> SqlWarning {
    SqlWarning::warning(1292, format!("Truncated incorrect {} value: '{}'", name, value))
}

/// Clamp `value` into `min..=max`, reporting a truncation when it moved.
fn clamp(name: &str, value: i64, min: i64, max: i64) -> (i64, Option<SqlWarning>) {
    let clamped = value.clamp(min, max);
    let warning = (clamped != value).then(|| truncated(name, value));
    (clamped, warning)
}

impl DdlVars {
    pub fn from_config(cfg: &ReorgConfig) -> Self {
        let vars = Self::default();
        vars.set_reorg_worker_count(cfg.worker_cnt as i64);
        vars.set_reorg_batch_size(cfg.batch_size as i64);
        vars.set_error_count_limit(cfg.error_count_limit);
        vars
    }

    pub fn reorg_worker_count(&self) -> i32 {
        self.reorg_worker_cnt.load(Ordering::Relaxed)
    }

    pub fn reorg_batch_size(&self) -> i32 {
        self.reorg_batch_size.load(Ordering::Relaxed)
    }

    pub fn error_count_limit(&self) -> i64 {
        self.error_count_limit.load(Ordering::Relaxed)
    }

    pub fn set_reorg_worker_count(&self, value: i64) -> Option<SqlWarning> {
        let (v, warning) = clamp(TIDB_DDL_REORG_WORKER_CNT, value, 1, MAX_DDL_REORG_WORKER_COUNT as i64);
        self.reorg_worker_cnt.store(v as i32, Ordering::Relaxed);
        info!(value = v, "{} set", TIDB_DDL_REORG_WORKER_CNT);
        warning
    }

    pub fn set_reorg_batch_size(&self, value: i64) -> Option<SqlWarning> {
        let (v, warning) = clamp(
            TIDB_DDL_REORG_BATCH_SIZE,
            value,
            MIN_DDL_REORG_BATCH_SIZE as i64,
            MAX_DDL_REORG_BATCH_SIZE as i64,
        );
        self.reorg_batch_size.store(v as i32, Ordering::Relaxed);
        info!(value = v, "{} set", TIDB_DDL_REORG_BATCH_SIZE);
        warning
    }

    pub fn set_error_count_limit(&self, value: i64) -> Option<SqlWarning> {
        let (v, warning) = clamp(TIDB_DDL_ERROR_COUNT_LIMIT, value, 0, i64::MAX);
        self.error_count_limit.store(v, Ordering::Relaxed);
        warning
    }

    /// Set a tunable by its system variable name. `None` when the name is not
    /// one of the DDL tunables.
    pub fn set_by_name(&self, name: &str, value: i64) -> Option<Option<SqlWarning>> {
        match name.to_lowercase().as_str() {
            TIDB_DDL_REORG_WORKER_CNT => Some(self.set_reorg_worker_count(value)),
            TIDB_DDL_REORG_BATCH_SIZE => Some(self.set_reorg_batch_size(value)),
            TIDB_DDL_ERROR_COUNT_LIMIT => Some(self.set_error_count_limit(value)),
            _ => None,
        }
    }

    pub fn get_by_name(&self, name: &str) -> Option<i64> {
        match name.to_lowercase().as_str() {
            TIDB_DDL_REORG_WORKER_CNT => Some(self.reorg_worker_count() as i64),
            TIDB_DDL_REORG_BATCH_SIZE => Some(self.reorg_batch_size() as i64),
            TIDB_DDL_ERROR_COUNT_LIMIT => Some(self.error_count_limit()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let vars = DdlVars::default();
        assert_eq!(vars.reorg_worker_count(), 4);
        assert_eq!(vars.reorg_batch_size(), 256);
        assert_eq!(vars.error_count_limit(), 512);
    }

    #[test]
    fn test_out_of_range_values_are_clamped_with_warning() {
        let vars = DdlVars::default();
        let warning = vars.set_reorg_worker_count(257).unwrap();
        assert_eq!(vars.reorg_worker_count(), 256);
        assert_eq!(warning.code, 1292);
        assert_eq!(
            warning.message,
            "Truncated incorrect tidb_ddl_reorg_worker_cnt value: '257'"
        );

        assert!(vars.set_reorg_worker_count(0).is_some());
        assert_eq!(vars.reorg_worker_count(), 1);

        assert!(vars.set_reorg_batch_size(31).is_some());
        assert_eq!(vars.reorg_batch_size(), 32);
        assert!(vars.set_reorg_batch_size(10241).is_some());
        assert_eq!(vars.reorg_batch_size(), 10240);
        assert!(vars.set_reorg_batch_size(100).is_none());

        assert!(vars.set_error_count_limit(-1).is_some());
        assert_eq!(vars.error_count_limit(), 0);
        assert!(vars.set_error_count_limit(i64::MAX).is_none());
    }

    #[test]
    fn test_by_name() {
        let vars = DdlVars::default();
        assert!(vars.set_by_name("TIDB_DDL_REORG_BATCH_SIZE", 64).unwrap().is_none());
        assert_eq!(vars.get_by_name("tidb_ddl_reorg_batch_size"), Some(64));
        assert!(vars.set_by_name("unknown", 1).is_none());
    }
}
