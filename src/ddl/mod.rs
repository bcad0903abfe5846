//! Online, asynchronous schema changes.
//!
//! Statements are turned into jobs, persisted in the metadata store and
//! advanced by background workers one schema state at a time. Every step
//! that changes visible schema publishes a new schema version together with
//! a diff, and the submitter waits until its job lands in the history queue.

pub mod column;
pub mod executor;
pub mod handler;
pub mod index;
pub mod policy;
pub mod reorg;
pub mod schema;
pub mod stmt;
pub mod table;
pub mod validate;
pub mod vars;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::DdlConfig;
use crate::errors::{AdminError, DdlError, JobError, Result};
use crate::kv::{StoreRef, run_in_new_txn};
use crate::meta::Meta;
use crate::model::{Job, JobState};
use crate::retry::retry_with_backoff;

pub use executor::ExecContext;
pub use handler::{HandlerRegistry, JobContext, JobHandler};
pub use vars::DdlVars;

use worker::Worker;

/// Brings the local InfoSchema up to a published schema version.
#[async_trait]
pub trait SchemaSyncer: Send + Sync {
    async fn sync(&self, version: i64) -> Result<()>;
}

/// State shared by the submitter side and every worker.
pub(crate) struct DdlShared {
    pub(crate) store: StoreRef,
    pub(crate) config: DdlConfig,
    pub(crate) vars: Arc<DdlVars>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) syncer: Arc<dyn SchemaSyncer>,
    /// Wakes idle workers when a job is queued or changed by an operator.
    pub(crate) job_notify: Notify,
    /// Wakes submitters after any job step.
    pub(crate) done_notify: Notify,
}

pub struct Ddl {
    shared: Arc<DdlShared>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Ddl {
    pub fn new(store: StoreRef, config: DdlConfig, vars: Arc<DdlVars>, syncer: Arc<dyn SchemaSyncer>) -> Self {
        Self::with_registry(store, config, vars, syncer, HandlerRegistry::with_standard_handlers())
    }

    pub fn with_registry(
        store: StoreRef,
        config: DdlConfig,
        vars: Arc<DdlVars>,
        syncer: Arc<dyn SchemaSyncer>,
        registry: HandlerRegistry,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(DdlShared {
                store,
                config,
                vars,
                registry,
                syncer,
                job_notify: Notify::new(),
                done_notify: Notify::new(),
            }),
            shutdown,
            workers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Spawn the configured number of workers on the current runtime.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !workers.is_empty() {
            return;
        }
        let tag: u32 = rand::random();
        for i in 0..self.shared.config.worker_count {
            let worker = Worker::new(format!("ddl-{:08x}-{}", tag, i), self.shared.clone());
            workers.push(tokio::spawn(worker.run(self.shutdown.subscribe())));
        }
        info!(workers = workers.len(), "DDL started");
    }

    /// Stop the workers and wait for them. Queued jobs stay queued.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "DDL worker exited abnormally");
            }
        }
        info!("DDL closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &StoreRef {
        &self.shared.store
    }

    pub fn config(&self) -> &DdlConfig {
        &self.shared.config
    }

    pub fn vars(&self) -> &Arc<DdlVars> {
        &self.shared.vars
    }

    pub fn gen_global_ids(&self, n: usize) -> Result<Vec<i64>> {
        run_in_new_txn(&self.shared.store, self.shared.config.txn_retry_limit, |txn| {
            Meta::new(txn).gen_global_ids(n)
        })
    }

    fn enqueue(&self, job: &Job) -> Result<i64> {
        run_in_new_txn(&self.shared.store, self.shared.config.txn_retry_limit, |txn| {
            let mut m = Meta::new(txn);
            let mut job = job.clone();
            job.id = m.gen_global_id()?;
            job.state = JobState::Queueing;
            m.enqueue_job(&job)?;
            Ok(job.id)
        })
    }

    /// Queue a job, wait for it to finish and for the local InfoSchema to
    /// include its final schema version.
    pub async fn do_ddl_job(&self, job: Job) -> Result<Job> {
        if self.is_closed() {
            return Err(AdminError::Closed.into());
        }
        let job_id = retry_with_backoff(&self.shared.config.retry_config(), || self.enqueue(&job)).await?;
        info!(job_id, tp = %job.tp, query = %job.query, "DDL job queued");
        self.shared.job_notify.notify_one();

        let deadline = Instant::now() + self.shared.config.job_wait_timeout();
        let finished = loop {
            let notified = self.shared.done_notify.notified();
            let history = run_in_new_txn(&self.shared.store, self.shared.config.txn_retry_limit, |txn| {
                Meta::new(txn).get_history_job(job_id)
            })?;
            if let Some(job) = history {
                break job;
            }
            if Instant::now() >= deadline {
                return Err(AdminError::WaitTimeout(job_id).into());
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.shared.config.tick()) => {}
            }
        };

        self.shared.syncer.sync(finished.binlog.schema_version).await?;
        match finished.state {
            JobState::Done => Ok(finished),
            _ => Err(finished
                .error
                .clone()
                .map(DdlError::Job)
                .unwrap_or_else(|| AdminError::Cancelled.into())),
        }
    }

    /// A job from the queue or the history.
    pub fn job_status(&self, job_id: i64) -> Result<Job> {
        run_in_new_txn(&self.shared.store, self.shared.config.txn_retry_limit, |txn| {
            let mut m = Meta::new(txn);
            if let Some(job) = m.get_queued_job(job_id)? {
                return Ok(job);
            }
            m.get_history_job(job_id)?
                .ok_or_else(|| AdminError::JobNotFound(job_id).into())
        })
    }

    /// Every queued job followed by up to `history_limit` finished jobs, newest first.
    pub fn show_jobs(&self, history_limit: usize) -> Result<Vec<Job>> {
        run_in_new_txn(&self.shared.store, self.shared.config.txn_retry_limit, |txn| {
            let mut m = Meta::new(txn);
            let mut jobs = m.queued_jobs()?;
            jobs.extend(m.history_jobs(history_limit)?);
            Ok(jobs)
        })
    }

    /// Cancel a job. Queued jobs finish immediately; running jobs roll back
    /// as long as they have not passed their point of no return.
    pub fn cancel_job(&self, job_id: i64) -> Result<()> {
        let cancelled = JobError::from(&DdlError::from(AdminError::Cancelled));
        run_in_new_txn(&self.shared.store, self.shared.config.txn_retry_limit, |txn| {
            let mut m = Meta::new(txn);
            let Some(mut job) = m.get_queued_job(job_id)? else {
                return Err(match m.get_history_job(job_id)? {
                    Some(_) => AdminError::JobAlreadyFinished(job_id),
                    None => AdminError::JobNotFound(job_id),
                }
                .into());
            };
            match job.state {
                JobState::Queueing => {
                    job.error = Some(cancelled.clone());
                    let version = m.get_schema_version()?;
                    job.finish(JobState::Cancelled, version);
                    m.finish_job(&job)?;
                }
                JobState::Running if job.is_rollbackable() => {
                    job.error = Some(cancelled.clone());
                    job.state = JobState::Cancelling;
                    m.update_job(&job)?;
                }
                JobState::Cancelling => {}
                _ => return Err(AdminError::CannotCancelJob(job_id).into()),
            }
            Ok(())
        })?;
        info!(job_id, "DDL job cancel requested");
        self.shared.job_notify.notify_one();
        self.shared.done_notify.notify_waiters();
        Ok(())
    }

    /// Put a paused job back into the state it was paused from.
    pub fn resume_job(&self, job_id: i64) -> Result<()> {
        run_in_new_txn(&self.shared.store, self.shared.config.txn_retry_limit, |txn| {
            let mut m = Meta::new(txn);
            let mut job = m
                .get_queued_job(job_id)?
                .ok_or(AdminError::JobNotFound(job_id))?;
            if job.state != JobState::Paused {
                return Err(AdminError::JobNotPaused(job_id).into());
            }
            job.state = job.paused_from.take().unwrap_or(JobState::Running);
            job.error_count = 0;
            m.update_job(&job)
        })?;
        info!(job_id, "DDL job resumed");
        self.shared.job_notify.notify_one();
        Ok(())
    }
}
