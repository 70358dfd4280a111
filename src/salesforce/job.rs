//! Bulk API v2 job model shared by ingest, query and the poller.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;
use crate::salesforce::client::{ApiRequest, SalesforceClient};
use crate::salesforce::redact_id;
use crate::streaming::Record;

// ─────────────────────────────────────────────────────────────────────────────
// JobState
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a bulk job.
///
/// `Open → UploadComplete → {JobComplete | Failed | Aborted}`; `Open` may
/// also go straight to `Aborted` or `Failed`. The remote's intermediate
/// `InProgress` is reported as `UploadComplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Job created, accepting data.
    Open,
    /// Data handed to Salesforce; processing may be under way.
    UploadComplete,
    /// Processing finished.
    JobComplete,
    /// Processing failed.
    Failed,
    /// Job aborted.
    Aborted,
}

impl JobState {
    /// Maps a state string reported by Salesforce. Returns `None` for states
    /// this client does not know.
    pub fn from_remote(state: &str) -> Option<Self> {
        match state {
            "Open" => Some(JobState::Open),
            "UploadComplete" | "InProgress" => Some(JobState::UploadComplete),
            "JobComplete" => Some(JobState::JobComplete),
            "Failed" => Some(JobState::Failed),
            "Aborted" => Some(JobState::Aborted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Open => "Open",
            JobState::UploadComplete => "UploadComplete",
            JobState::JobComplete => "JobComplete",
            JobState::Failed => "Failed",
            JobState::Aborted => "Aborted",
        }
    }

    /// True for `JobComplete`, `Failed` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::JobComplete | JobState::Failed | JobState::Aborted
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    /// Staying in a non-terminal state is allowed.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (from, to) if from == to => true,
            (Open, UploadComplete | Failed | Aborted) => true,
            (UploadComplete, JobComplete | Failed | Aborted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobKind
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a job id refers to an ingest or a query job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Ingest,
    Query,
}

impl JobKind {
    /// Path segment under `/jobs`.
    pub fn path_segment(self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::Query => "query",
        }
    }

    /// Log prefix for this job kind.
    pub(crate) fn log_prefix(self) -> &'static str {
        match self {
            JobKind::Ingest => "[BULK-INGEST]",
            JobKind::Query => "[BULK-QUERY]",
        }
    }

    /// `/services/data/vXX.X/jobs/{kind}`
    pub(crate) fn jobs_path(self, data_path: &str) -> String {
        format!("{}/jobs/{}", data_path, self.path_segment())
    }

    /// `/services/data/vXX.X/jobs/{kind}/{job_id}`
    pub(crate) fn job_path(self, data_path: &str, job_id: &str) -> String {
        format!("{}/{}", self.jobs_path(data_path), job_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkJob
// ─────────────────────────────────────────────────────────────────────────────

/// A bulk job and the last state this client observed or caused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkJob {
    id: String,
    kind: JobKind,
    state: JobState,
}

impl BulkJob {
    pub(crate) fn new(id: String, kind: JobKind, state: JobState) -> Self {
        Self { id, kind, state }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves the job to `next`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidJobTransition` if the state machine forbids it;
    /// the job is left unchanged.
    pub fn transition(&mut self, next: JobState) -> Result<(), Error> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidJobTransition {
                job_id: self.id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobInfo
// ─────────────────────────────────────────────────────────────────────────────

/// Job status as reported by `GET /jobs/{kind}/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub state: JobState,
    pub object: Option<String>,
    pub operation: Option<String>,
    pub records_processed: u64,
    pub records_failed: u64,
    /// Job-level error message; empty strings are normalized to `None`.
    pub error_message: Option<String>,
}

/// Wire shape of a job status response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobInfoWire {
    id: String,
    state: String,
    #[serde(default)]
    object: Option<String>,
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    number_records_processed: Option<u64>,
    #[serde(default)]
    number_records_failed: Option<u64>,
    #[serde(default)]
    error_message: Option<String>,
}

impl TryFrom<JobInfoWire> for JobInfo {
    type Error = Error;

    fn try_from(wire: JobInfoWire) -> Result<Self, Self::Error> {
        let state = JobState::from_remote(&wire.state).ok_or_else(|| Error::UnexpectedJobState {
            job_id: wire.id.clone(),
            state: wire.state.clone(),
            expected: "a known bulk job state".to_string(),
        })?;

        Ok(Self {
            id: wire.id,
            state,
            object: wire.object,
            operation: wire.operation,
            records_processed: wire.number_records_processed.unwrap_or(0),
            records_failed: wire.number_records_failed.unwrap_or(0),
            error_message: wire.error_message.filter(|m| !m.trim().is_empty()),
        })
    }
}

impl JobInfo {
    /// True once the job finished without failed records or a job error.
    pub fn is_success(&self) -> bool {
        self.state == JobState::JobComplete && self.records_failed == 0 && self.error_message.is_none()
    }

    /// Promotes a terminal non-success to `Error::JobFailed`.
    pub(crate) fn ensure_success(&self) -> Result<(), Error> {
        if !self.state.is_terminal() || self.is_success() {
            return Ok(());
        }

        let message = match (&self.error_message, self.state) {
            (Some(message), _) => message.clone(),
            (None, JobState::JobComplete) => {
                format!("{} record(s) failed", self.records_failed)
            }
            (None, state) => format!("job {}", state.as_str().to_ascii_lowercase()),
        };

        Err(Error::JobFailed {
            job_id: self.id.clone(),
            state: self.state.to_string(),
            failed_records: self.records_failed,
            message,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobOutcome
// ─────────────────────────────────────────────────────────────────────────────

/// Final result of a job that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub id: String,
    pub state: JobState,
    pub records_processed: u64,
    pub failed_count: u64,
    pub error_message: Option<String>,
    /// Rows of `successfulResults`, when fetched.
    pub successful: Option<Vec<Record>>,
    /// Rows of `failedResults`, when fetched.
    pub failed: Option<Vec<Record>>,
}

impl JobOutcome {
    pub(crate) fn from_info(info: JobInfo) -> Self {
        Self {
            id: info.id,
            state: info.state,
            records_processed: info.records_processed,
            failed_count: info.records_failed,
            error_message: info.error_message,
            successful: None,
            failed: None,
        }
    }

    /// True for `JobComplete` with no failed records and no job error.
    pub fn is_success(&self) -> bool {
        self.state == JobState::JobComplete && self.failed_count == 0 && self.error_message.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared Job Requests
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for changing job state (close or abort).
#[derive(Debug, Serialize)]
struct UpdateJobStateRequest {
    state: &'static str,
}

/// Fetches the current status of a job.
pub(crate) async fn fetch_job_info(
    client: &SalesforceClient,
    kind: JobKind,
    job_id: &str,
) -> Result<JobInfo, Error> {
    let path = kind.job_path(&client.data_path(), job_id);

    info!(
        "{} GET /jobs/{}/{} (status)",
        kind.log_prefix(),
        kind.path_segment(),
        redact_id(job_id)
    );

    let response = client.execute(&ApiRequest::get(path)).await?;
    let wire: JobInfoWire = response.json()?;
    JobInfo::try_from(wire)
}

/// PATCHes the job's state.
pub(crate) async fn update_job_state(
    client: &SalesforceClient,
    kind: JobKind,
    job_id: &str,
    state: JobState,
) -> Result<(), Error> {
    let path = kind.job_path(&client.data_path(), job_id);

    info!(
        "{} PATCH /jobs/{}/{} -> {}",
        kind.log_prefix(),
        kind.path_segment(),
        redact_id(job_id),
        state
    );

    let request = ApiRequest::patch(path).json(&UpdateJobStateRequest {
        state: state.as_str(),
    })?;
    client.execute(&request).await?;
    Ok(())
}
