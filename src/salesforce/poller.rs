//! Completion poller for bulk jobs.
//!
//! Each job is observed by its own task: wait one interval, fetch the job
//! status, repeat until the job reaches a terminal state or the deadline
//! passes. [`CompletionPoller::await_all`] returns on the first failure or
//! once every job has completed successfully. Dropping the task set on an
//! early return aborts the observers still running.

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::PollConfig;
use crate::error::Error;
use crate::salesforce::client::SalesforceClient;
use crate::salesforce::job::{fetch_job_info, JobInfo, JobKind, JobOutcome};
use crate::salesforce::redact_id;

/// Waits for bulk jobs to finish.
#[derive(Debug, Clone)]
pub struct CompletionPoller {
    client: SalesforceClient,
    config: PollConfig,
}

impl CompletionPoller {
    pub fn new(client: SalesforceClient, config: PollConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Observes every job concurrently.
    ///
    /// Returns `Ok(())` once all jobs reach `JobComplete` with no failed
    /// records and no job error. Otherwise returns the first error observed;
    /// errors other jobs would have produced later are not reported.
    ///
    /// # Errors
    ///
    /// - `Error::JobFailed` - a job ended `Failed` or `Aborted`, or completed
    ///   with failed records or an error message
    /// - `Error::Timeout` - a job was still running at the deadline
    /// - Transport and remote errors from a status request
    pub async fn await_all(&self, job_ids: &[String], kind: JobKind) -> Result<(), Error> {
        if job_ids.is_empty() {
            return Ok(());
        }

        info!(
            "[POLLER] Watching {} {} job(s) (interval {:?}, deadline {:?})",
            job_ids.len(),
            kind.path_segment(),
            self.config.interval,
            self.config.deadline
        );

        let mut observers: JoinSet<Result<(), Error>> = JoinSet::new();
        for job_id in job_ids {
            let client = self.client.clone();
            let config = self.config;
            let job_id = job_id.clone();

            observers.spawn(async move {
                let info = observe(&client, kind, &job_id, &config).await?;
                info.ensure_success()
            });
        }

        while let Some(joined) = observers.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) if join_error.is_panic() => {
                    std::panic::resume_unwind(join_error.into_panic())
                }
                Err(join_error) => {
                    warn!("[POLLER] Observer task cancelled: {:?}", join_error);
                    continue;
                }
            };

            if let Err(error) = result {
                warn!(
                    "[POLLER] Stopping with {} observer(s) still running: {}",
                    observers.len(),
                    error
                );
                return Err(error);
            }
        }

        info!("[POLLER] All {} job(s) completed", job_ids.len());
        Ok(())
    }

    /// Observes a single job and returns its outcome.
    ///
    /// # Errors
    ///
    /// Same as [`await_all`](Self::await_all).
    pub async fn await_job(&self, job_id: &str, kind: JobKind) -> Result<JobOutcome, Error> {
        let info = observe(&self.client, kind, job_id, &self.config).await?;
        info.ensure_success()?;
        Ok(JobOutcome::from_info(info))
    }
}

/// Polls one job until it is terminal or the deadline passes.
async fn observe(
    client: &SalesforceClient,
    kind: JobKind,
    job_id: &str,
    config: &PollConfig,
) -> Result<JobInfo, Error> {
    let polling = async {
        let mut polls = 0u32;
        loop {
            tokio::time::sleep(config.interval).await;
            polls += 1;

            let info = fetch_job_info(client, kind, job_id).await?;
            if info.state.is_terminal() {
                info!(
                    "[POLLER] Job {} is {} after {} poll(s)",
                    redact_id(job_id),
                    info.state,
                    polls
                );
                return Ok(info);
            }
        }
    };

    match tokio::time::timeout(config.deadline, polling).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "[POLLER] Job {} not finished after {:?}",
                redact_id(job_id),
                config.deadline
            );
            Err(Error::Timeout {
                job_id: job_id.to_string(),
                waited: config.deadline,
            })
        }
    }
}
