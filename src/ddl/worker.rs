//! The job worker loop.
//!
//! A worker repeatedly picks the oldest runnable job from the queue, leases
//! it, and advances it by one step per metadata transaction. Steps run on the
//! blocking pool; after a step bumps the schema version the worker waits for
//! the local InfoSchema to catch up before taking the next step.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::ddl::DdlShared;
use crate::ddl::handler::JobContext;
use crate::error_utils::{RecoveryStrategy, get_recovery_strategy};
use crate::errors::{DdlError, JobError, KvError, Result};
use crate::kv::run_in_new_txn;
use crate::meta::Meta;
use crate::model::{Job, JobLease, JobState};

/// What one pass of the worker achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    /// Nothing runnable.
    Idle,
    /// The job advanced; `version` is set when the step published a schema version.
    Progress { version: Option<i64> },
    /// The step failed and the job was updated according to the recovery strategy.
    Failed(RecoveryStrategy),
}

#[derive(Clone)]
pub(crate) struct Worker {
    id: String,
    shared: Arc<DdlShared>,
}

impl Worker {
    pub(crate) fn new(id: String, shared: Arc<DdlShared>) -> Self {
        Self { id, shared }
    }

    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.id, "DDL worker started");
        'outer: loop {
            loop {
                if *shutdown.borrow() {
                    break 'outer;
                }
                match self.step_once().await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        warn!(worker = %self.id, error = %e, "DDL worker step failed");
                        break;
                    }
                }
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.shared.job_notify.notified() => {}
                _ = tokio::time::sleep(self.shared.config.tick()) => {}
            }
        }
        info!(worker = %self.id, "DDL worker stopped");
    }

    /// Run one step. Returns whether the worker should immediately look for more work.
    #[instrument(level = "trace", skip(self), fields(worker = %self.id))]
    async fn step_once(&self) -> Result<bool> {
        let this = self.clone();
        let outcome = tokio::task::spawn_blocking(move || this.run_step())
            .await
            .map_err(|e| DdlError::Internal(format!("DDL worker task failed: {}", e)))??;
        match outcome {
            StepOutcome::Idle => Ok(false),
            StepOutcome::Progress { version } => {
                if let Some(version) = version {
                    self.shared.syncer.sync(version).await?;
                }
                self.shared.done_notify.notify_waiters();
                Ok(true)
            }
            StepOutcome::Failed(strategy) => {
                self.shared.done_notify.notify_waiters();
                Ok(strategy == RecoveryStrategy::Rollback)
            }
        }
    }

    fn run_step(&self) -> Result<StepOutcome> {
        let Some(job) = self.pick_job()? else {
            return Ok(StepOutcome::Idle);
        };
        match self.advance(job.id) {
            Ok(outcome) => Ok(outcome),
            Err(DdlError::Kv(KvError::LeaseLost { job_id, .. })) => {
                warn!(worker = %self.id, job_id, "job leased by another worker, skipping");
                Ok(StepOutcome::Idle)
            }
            Err(err) => self.handle_job_error(job.id, &err).map(StepOutcome::Failed),
        }
    }

    fn lease(&self) -> JobLease {
        JobLease {
            worker: self.id.clone(),
            expires_at: Utc::now() + TimeDelta::milliseconds(self.shared.config.lease_ms as i64),
        }
    }

    /// Lease the oldest job that is not paused, not owned by a live worker and
    /// not waiting on an earlier job touching the same objects.
    fn pick_job(&self) -> Result<Option<Job>> {
        run_in_new_txn(&self.shared.store, self.shared.config.txn_retry_limit, |txn| {
            let mut m = Meta::new(txn);
            let queue = m.queued_jobs()?;
            let now = Utc::now();
            let picked = queue.iter().enumerate().find(|(i, job)| {
                job.state != JobState::Paused
                    && !job.is_lease_held_by_other(&self.id, now)
                    && !queue[..*i].iter().any(|earlier| job.depends_on(earlier))
            });
            let Some((_, job)) = picked else {
                return Ok(None);
            };
            let mut job = job.clone();
            if job.state == JobState::Queueing {
                job.state = JobState::Running;
                job.started_at = Some(now);
                info!(worker = %self.id, job = %job, "DDL job started");
            }
            job.lease = Some(self.lease());
            m.update_job(&job)?;
            Ok(Some(job))
        })
    }

    /// Advance a leased job by one step inside a single transaction.
    #[instrument(level = "debug", skip(self), fields(worker = %self.id))]
    fn advance(&self, job_id: i64) -> Result<StepOutcome> {
        let ctx = JobContext {
            store: &self.shared.store,
            vars: &self.shared.vars,
            worker: &self.id,
            txn_retry_limit: self.shared.config.txn_retry_limit,
        };
        run_in_new_txn(&self.shared.store, self.shared.config.txn_retry_limit, |txn| {
            let mut m = Meta::new(txn);
            let Some(mut job) = m.get_queued_job(job_id)? else {
                return Ok(StepOutcome::Idle);
            };
            if job.is_lease_held_by_other(&self.id, Utc::now()) {
                return Err(KvError::LeaseLost {
                    worker: self.id.clone(),
                    job_id,
                }
                .into());
            }
            let handler = self.shared.registry.get(job.tp)?;
            let diff = match job.state {
                JobState::Running => {
                    let diff = handler.on_job(&ctx, &mut m, &mut job)?;
                    job.error = None;
                    diff
                }
                JobState::RollingBack | JobState::Cancelling => {
                    let cancelling = job.state == JobState::Cancelling;
                    let diff = handler.on_rollback(&ctx, &mut m, &mut job)?;
                    if cancelling && job.state == JobState::RollbackDone {
                        job.state = JobState::Cancelled;
                    }
                    diff
                }
                _ => return Ok(StepOutcome::Idle),
            };

            let mut version = None;
            if let Some(mut diff) = diff {
                let v = m.gen_schema_version()?;
                diff.version = v;
                m.set_schema_diff(&diff)?;
                version = Some(v);
            }

            if job.is_finished() {
                let v = match version {
                    Some(v) => v,
                    None => m.get_schema_version()?,
                };
                job.finish(job.state, v);
                job.binlog.finished_ts = m.txn().start_ts();
                m.finish_job(&job)?;
                info!(worker = %self.id, job = %job, "DDL job finished");
            } else {
                job.lease = Some(self.lease());
                m.update_job(&job)?;
                debug!(worker = %self.id, job_id, schema_state = %job.schema_state, ?version, "DDL job step done");
            }
            Ok(StepOutcome::Progress { version })
        })
    }

    /// Record a failed step and pick how the job continues.
    fn handle_job_error(&self, job_id: i64, err: &DdlError) -> Result<RecoveryStrategy> {
        let limit = self.shared.vars.error_count_limit();
        run_in_new_txn(&self.shared.store, self.shared.config.txn_retry_limit, |txn| {
            let mut m = Meta::new(txn);
            let Some(mut job) = m.get_queued_job(job_id)? else {
                return Ok(RecoveryStrategy::Retry);
            };
            job.error_count += 1;
            let reversible = job.state == JobState::Running && job.is_rollbackable();
            let strategy = get_recovery_strategy(err, reversible, job.error_count, limit);
            job.error = Some(JobError::from(err));
            match strategy {
                RecoveryStrategy::Retry => {
                    warn!(worker = %self.id, job_id, error_count = job.error_count, error = %err, "DDL job step failed, will retry");
                }
                RecoveryStrategy::Rollback => {
                    warn!(worker = %self.id, job_id, error = %err, "DDL job failed, rolling back");
                    job.state = JobState::RollingBack;
                }
                RecoveryStrategy::Pause => {
                    error!(worker = %self.id, job_id, error = %err, "DDL job cannot proceed or roll back, pausing");
                    job.paused_from = Some(job.state);
                    job.state = JobState::Paused;
                }
            }
            job.lease = None;
            m.update_job(&job)?;
            Ok(strategy)
        })
    }
}
