//! Index backfill.
//!
//! Rows are read from the snapshot taken when the index entered write
//! reorganization. Rows written after that are indexed by the write path
//! itself, so the backfill only has to cover the snapshot. Each round hands
//! `tidb_ddl_reorg_worker_cnt` batches of `tidb_ddl_reorg_batch_size` keys to
//! scoped threads; every batch commits in its own transaction and the last
//! processed key is checkpointed after each round.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ddl::handler::JobContext;
use crate::errors::{DdlError, Result};
use crate::kv::codec::record_prefix;
use crate::kv::{Key, Snapshot, run_in_new_txn};
use crate::meta::Meta;
use crate::model::{IndexInfo, Job, TableInfo};
use crate::table::{decode_rows, put_index_entry};

/// Backfill progress persisted between job steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReorgInfo {
    pub snapshot_ver: u64,
    pub last_key: Option<Key>,
    pub added: i64,
}

fn load_checkpoint(ctx: &JobContext<'_>, job: &Job) -> Result<ReorgInfo> {
    let stored: Option<ReorgInfo> = run_in_new_txn(ctx.store, ctx.txn_retry_limit, |txn| {
        Meta::new(txn).get_reorg_info(job.id)
    })?;
    Ok(match stored {
        Some(info) if info.snapshot_ver == job.snapshot_ver => info,
        _ => ReorgInfo {
            snapshot_ver: job.snapshot_ver,
            ..Default::default()
        },
    })
}

fn save_checkpoint(ctx: &JobContext<'_>, job_id: i64, info: &ReorgInfo) -> Result<()> {
    run_in_new_txn(ctx.store, ctx.txn_retry_limit, |txn| Meta::new(txn).set_reorg_info(job_id, info))
}

/// Index one batch of record keys. Rows deleted since the snapshot are skipped.
fn backfill_batch(ctx: &JobContext<'_>, table: &TableInfo, index: &IndexInfo, keys: &[Key]) -> Result<i64> {
    run_in_new_txn(ctx.store, ctx.txn_retry_limit, |txn| {
        let mut added = 0;
        for key in keys {
            let Some(value) = txn.get(key) else { continue };
            for row in decode_rows(table, vec![(key.clone(), value)])? {
                put_index_entry(txn, table, index, &row.values, &row.handle)?;
                added += 1;
            }
        }
        Ok(added)
    })
}

/// Fill `index` for every row visible at the job's snapshot. Returns the
/// number of rows indexed across all steps of the job.
pub fn backfill_index(ctx: &JobContext<'_>, job: &Job, table: &TableInfo, index: &IndexInfo) -> Result<i64> {
    let mut info = load_checkpoint(ctx, job)?;
    let snapshot = Snapshot::new(ctx.store.clone(), job.snapshot_ver);
    let keys: Vec<Key> = snapshot
        .scan_prefix(&record_prefix(table.id))
        .into_iter()
        .map(|(k, _)| k)
        .filter(|k| info.last_key.as_ref().is_none_or(|last| k > last))
        .collect();
    info!(
        job_id = job.id,
        index = %index.name,
        pending = keys.len(),
        resumed_from = info.added,
        "backfill started"
    );

    let mut rest = keys.as_slice();
    while !rest.is_empty() {
        let batch_size = ctx.vars.reorg_batch_size().max(1) as usize;
        let workers = ctx.vars.reorg_worker_count().max(1) as usize;
        let round_len = rest.len().min(batch_size * workers);
        let (round, tail) = rest.split_at(round_len);

        let results: Vec<Result<i64>> = std::thread::scope(|s| {
            let handles: Vec<_> = round
                .chunks(batch_size)
                .map(|batch| s.spawn(move || backfill_batch(ctx, table, index, batch)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(DdlError::Internal("backfill worker panicked".to_string())))
                })
                .collect()
        });
        for result in results {
            info.added += result?;
        }

        info.last_key = round.last().cloned();
        save_checkpoint(ctx, job.id, &info)?;
        debug!(job_id = job.id, added = info.added, remaining = tail.len(), "backfill round done");
        rest = tail;
    }
    Ok(info.added)
}
