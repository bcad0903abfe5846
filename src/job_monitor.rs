use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::ddl::Ddl;
use crate::errors::Result;
use crate::model::{ActionType, Job, JobState, SchemaState};

/// Snapshot of one watched job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusInfo {
    pub job_id: i64,
    pub tp: ActionType,
    pub schema_name: String,
    pub table_name: String,
    pub state: JobState,
    pub schema_state: SchemaState,
    pub row_count: i64,
    pub error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusInfo {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            tp: job.tp,
            schema_name: job.schema_name.clone(),
            table_name: job.table_name.clone(),
            state: job.state,
            schema_state: job.schema_state,
            row_count: job.row_count,
            error: job.error.as_ref().map(|e| e.to_string()),
            start_time: job.started_at,
            end_time: job.finished_at,
        }
    }
}

impl JobStatusInfo {
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }
}

/// Polls DDL jobs and logs every state change until they finish.
pub struct JobMonitor {
    interval: Duration,
    timeout: Duration,
}

impl JobMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Watch `job_ids` until all are finished or the timeout elapses and
    /// return their last observed statuses, in the order given.
    pub async fn watch(&self, ddl: &Ddl, job_ids: &[i64]) -> Result<Vec<JobStatusInfo>> {
        let deadline = Instant::now() + self.timeout;
        let mut last: HashMap<i64, JobStatusInfo> = HashMap::new();
        info!(jobs = job_ids.len(), timeout_ms = self.timeout.as_millis() as u64, "monitoring DDL jobs");
        loop {
            for &job_id in job_ids {
                if last.get(&job_id).is_some_and(JobStatusInfo::is_finished) {
                    continue;
                }
                let status = JobStatusInfo::from(&ddl.job_status(job_id)?);
                let changed = last
                    .get(&job_id)
                    .is_none_or(|prev| prev.state != status.state || prev.schema_state != status.schema_state);
                if changed {
                    info!(
                        job_id,
                        tp = %status.tp,
                        state = %status.state,
                        schema_state = %status.schema_state,
                        row_count = status.row_count,
                        "DDL job status"
                    );
                }
                last.insert(job_id, status);
            }

            if last.values().all(JobStatusInfo::is_finished) {
                break;
            }
            if Instant::now() >= deadline {
                let pending = last.values().filter(|s| !s.is_finished()).count();
                warn!(pending, "stopped monitoring DDL jobs before they finished");
                break;
            }
            sleep(self.interval).await;
        }
        Ok(job_ids.iter().filter_map(|id| last.remove(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::ddl::stmt::CreateDatabaseStmt;
    use crate::domain::Domain;
    use crate::kv::MemStore;

    #[tokio::test]
    async fn test_watch_reports_finished_jobs() {
        let config = ConfigBuilder::new().tick_ms(5).job_wait_timeout_ms(5_000).build();
        let domain = Domain::open(MemStore::new_ref(), config).await.unwrap();
        let ctx = domain.exec_context();
        domain
            .ddl()
            .create_database(&ctx, &CreateDatabaseStmt::new("d1"))
            .await
            .unwrap();
        let jobs = domain.ddl().show_jobs(1).unwrap();
        let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();

        let monitor = JobMonitor::new(Duration::from_millis(5), Duration::from_secs(1));
        let statuses = monitor.watch(domain.ddl(), &ids).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, JobState::Done);
        assert_eq!(statuses[0].tp, ActionType::CreateSchema);
        assert!(statuses[0].end_time.is_some());

        assert_eq!(monitor.watch(domain.ddl(), &[424242]).await.unwrap_err().code(), 8218);
        domain.close().await;
    }
}
