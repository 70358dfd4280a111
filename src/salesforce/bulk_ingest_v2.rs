//! Salesforce Bulk API v2 ingest jobs.
//!
//! This module provides functionality to:
//! - Create ingest jobs (insert, update, upsert, delete, hardDelete)
//! - Upload one batch of records per job as CSV and hand the job to Salesforce
//! - Submit a large record set as one job per batch
//! - Close, abort, delete and inspect jobs
//! - Fetch successful, failed and unprocessed record results
//!
//! # Security
//!
//! - Raw CSV contents are never logged
//! - Auth headers and tokens are never logged
//! - Only HTTP method, path, and sizes are logged

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Error;
use crate::salesforce::client::{ApiRequest, SalesforceClient, CONTENT_TYPE_CSV};
use crate::salesforce::job::{
    fetch_job_info, update_job_state, BulkJob, JobInfo, JobInfoWire, JobKind, JobOutcome, JobState,
};
use crate::salesforce::redact_id;
use crate::streaming::partitioner::partition_for_bulk;
use crate::streaming::record::{require_field, Record, ID_FIELD};
use crate::streaming::record_codec::{csv_to_records, records_to_csv, LineEnding};

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Bulk ingest operation type.
///
/// Serialized in the casing Salesforce expects (`insert`, `hardDelete`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkOperation {
    /// Insert new records.
    Insert,
    /// Update existing records by ID.
    Update,
    /// Insert or update records based on external ID field.
    Upsert,
    /// Delete records by ID (to the recycle bin).
    Delete,
    /// Delete records by ID, bypassing the recycle bin.
    HardDelete,
}

/// What to create for each batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestJobSpec {
    /// The Salesforce object name (e.g., "Account", "Contact").
    pub object: String,
    pub operation: BulkOperation,
    /// Required for upsert.
    pub external_id_field_name: Option<String>,
    /// Assignment rule applied to Case or Lead records.
    pub assignment_rule_id: Option<String>,
    pub line_ending: LineEnding,
}

impl IngestJobSpec {
    pub fn new(object: impl Into<String>, operation: BulkOperation) -> Self {
        Self {
            object: object.into(),
            operation,
            external_id_field_name: None,
            assignment_rule_id: None,
            line_ending: LineEnding::default(),
        }
    }

    pub fn with_external_id_field(mut self, field: impl Into<String>) -> Self {
        self.external_id_field_name = Some(field.into());
        self
    }

    pub fn with_assignment_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.assignment_rule_id = Some(rule_id.into());
        self
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    /// The external id field an upsert matches on.
    fn upsert_field(&self) -> Result<&str, Error> {
        self.external_id_field_name
            .as_deref()
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "Upsert of {} requires an external id field name",
                    self.object
                ))
            })
    }

    /// Checks that every record carries what the operation matches on:
    /// `Id` for update and deletes, the external id field for upsert.
    pub fn validate_records(&self, records: &[Record]) -> Result<(), Error> {
        match self.operation {
            BulkOperation::Insert => Ok(()),
            BulkOperation::Upsert => {
                let field = self.upsert_field()?;
                require_field(records, field, |index, field| Error::MissingExternalId {
                    index,
                    field,
                })
            }
            BulkOperation::Update | BulkOperation::Delete | BulkOperation::HardDelete => {
                require_field(records, ID_FIELD, |index, field| Error::MissingIdentifier {
                    index,
                    field,
                })
            }
        }
    }
}

/// A multi-batch submission that stopped part way.
///
/// `job_ids` lists every job created before the failure, including a job
/// whose upload failed (it has been aborted on a best-effort basis).
#[derive(Debug)]
pub struct PartialSubmission {
    pub job_ids: Vec<String>,
    pub error: Error,
}

impl fmt::Display for PartialSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bulk submission stopped after {} job(s): {}",
            self.job_ids.len(),
            self.error
        )
    }
}

impl std::error::Error for PartialSubmission {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for creating an ingest job.
///
/// Optional fields are skipped when `None`; Salesforce rejects a null
/// `externalIdFieldName` on insert.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateIngestJobRequest<'a> {
    object: &'a str,
    operation: BulkOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id_field_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignment_rule_id: Option<&'a str>,
    content_type: &'static str,
    line_ending: LineEnding,
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkIngestV2Client
// ─────────────────────────────────────────────────────────────────────────────

/// Client for Salesforce Bulk API v2 ingest jobs.
#[derive(Debug, Clone)]
pub struct BulkIngestV2Client {
    client: SalesforceClient,
}

impl BulkIngestV2Client {
    pub fn new(client: SalesforceClient) -> Self {
        Self { client }
    }

    /// Creates a new ingest job.
    ///
    /// # Errors
    ///
    /// - `Error::Config` - an upsert without an external id field name
    /// - `Error::UnexpectedResponse` - the response carries no job id
    /// - `Error::UnexpectedJobState` - the job was not created `Open`
    /// - Transport and remote errors
    pub async fn create_job(&self, spec: &IngestJobSpec) -> Result<BulkJob, Error> {
        if spec.operation == BulkOperation::Upsert {
            spec.upsert_field()?;
        }

        let body = CreateIngestJobRequest {
            object: &spec.object,
            operation: spec.operation,
            external_id_field_name: spec.external_id_field_name.as_deref(),
            assignment_rule_id: spec.assignment_rule_id.as_deref(),
            content_type: "CSV",
            line_ending: spec.line_ending,
        };

        info!(
            "[BULK-INGEST] POST /jobs/ingest (creating {:?} job for {})",
            spec.operation, spec.object
        );

        let path = JobKind::Ingest.jobs_path(&self.client.data_path());
        let response = self
            .client
            .execute(&ApiRequest::post(path).json(&body)?)
            .await?;

        let wire: JobInfoWire = response.json()?;
        let info = JobInfo::try_from(wire)?;

        if info.id.trim().is_empty() {
            return Err(Error::UnexpectedResponse(
                "Job creation response has no job id".to_string(),
            ));
        }
        if info.state != JobState::Open {
            return Err(Error::UnexpectedJobState {
                job_id: info.id,
                state: info.state.to_string(),
                expected: JobState::Open.to_string(),
            });
        }

        info!("[BULK-INGEST] Created job {}", redact_id(&info.id));
        Ok(BulkJob::new(info.id, JobKind::Ingest, JobState::Open))
    }

    /// Uploads `records` as the job's data and marks the upload complete.
    ///
    /// Only an `Open` job accepts data. If the upload or the close fails the
    /// job is aborted on a best-effort basis; an abort failure is logged and
    /// the original error is returned.
    pub async fn upload_job_data(
        &self,
        job: &mut BulkJob,
        records: &[Record],
        line_ending: LineEnding,
    ) -> Result<(), Error> {
        if job.state() != JobState::Open {
            return Err(Error::InvalidJobTransition {
                job_id: job.id().to_string(),
                from: job.state().to_string(),
                to: JobState::UploadComplete.to_string(),
            });
        }

        let result = self.put_and_close(job, records, line_ending).await;

        if let Err(original) = result {
            match update_job_state(&self.client, JobKind::Ingest, job.id(), JobState::Aborted).await {
                Ok(()) => {
                    job.transition(JobState::Aborted)?;
                }
                Err(abort_error) => warn!(
                    "[BULK-INGEST] Abort of job {} after failed upload also failed: {}",
                    redact_id(job.id()),
                    abort_error
                ),
            }
            return Err(original);
        }

        Ok(())
    }

    async fn put_and_close(
        &self,
        job: &mut BulkJob,
        records: &[Record],
        line_ending: LineEnding,
    ) -> Result<(), Error> {
        let csv = records_to_csv(records, line_ending)?;
        let path = format!(
            "{}/batches",
            JobKind::Ingest.job_path(&self.client.data_path(), job.id())
        );

        info!(
            "[BULK-INGEST] PUT /jobs/ingest/{}/batches ({} records, {} bytes)",
            redact_id(job.id()),
            records.len(),
            csv.len()
        );

        self.client.execute(&ApiRequest::put(path).csv(csv)).await?;
        self.close_job(job).await
    }

    /// Marks the job upload complete so Salesforce starts processing.
    pub async fn close_job(&self, job: &mut BulkJob) -> Result<(), Error> {
        self.change_state(job, JobState::UploadComplete).await
    }

    /// Aborts the job.
    pub async fn abort_job(&self, job: &mut BulkJob) -> Result<(), Error> {
        self.change_state(job, JobState::Aborted).await
    }

    /// Validates the transition locally, then PATCHes the remote job.
    async fn change_state(&self, job: &mut BulkJob, next: JobState) -> Result<(), Error> {
        if !job.state().can_transition_to(next) {
            return Err(Error::InvalidJobTransition {
                job_id: job.id().to_string(),
                from: job.state().to_string(),
                to: next.to_string(),
            });
        }

        update_job_state(&self.client, JobKind::Ingest, job.id(), next).await?;
        job.transition(next)
    }

    /// Deletes a job and its data. Salesforce only deletes jobs that are no
    /// longer processing.
    pub async fn delete_job(&self, job_id: &str) -> Result<(), Error> {
        let path = JobKind::Ingest.job_path(&self.client.data_path(), job_id);

        info!("[BULK-INGEST] DELETE /jobs/ingest/{}", redact_id(job_id));

        self.client.execute(&ApiRequest::delete(path)).await?;
        Ok(())
    }

    /// Gets the current status of an ingest job.
    pub async fn get_job_info(&self, job_id: &str) -> Result<JobInfo, Error> {
        fetch_job_info(&self.client, JobKind::Ingest, job_id).await
    }

    /// Partitions `records` and submits one job per batch: create, upload,
    /// complete upload. Batches are submitted strictly in order.
    ///
    /// Records are checked against the operation first (see
    /// [`IngestJobSpec::validate_records`]); a failed check sends nothing.
    /// On the first failure no further batch is submitted, and the ids of
    /// every job created so far come back with the error.
    pub async fn submit(
        &self,
        spec: &IngestJobSpec,
        records: Vec<Record>,
        batch_size: usize,
    ) -> Result<Vec<BulkJob>, PartialSubmission> {
        let batches = spec
            .validate_records(&records)
            .and_then(|()| partition_for_bulk(records, batch_size))
            .map_err(|error| PartialSubmission {
                job_ids: Vec::new(),
                error,
            })?;

        info!(
            "[BULK-INGEST] Submitting {} batch(es) to {}",
            batches.len(),
            spec.object
        );

        let mut jobs: Vec<BulkJob> = Vec::with_capacity(batches.len());

        for batch in batches {
            let mut job = match self.create_job(spec).await {
                Ok(job) => job,
                Err(error) => {
                    warn!(
                        "[BULK-INGEST] Job creation failed for batch {}; {} job(s) submitted",
                        batch.index(),
                        jobs.len()
                    );
                    return Err(PartialSubmission {
                        job_ids: job_ids(&jobs),
                        error,
                    });
                }
            };

            if let Err(error) = self
                .upload_job_data(&mut job, batch.records(), spec.line_ending)
                .await
            {
                warn!(
                    "[BULK-INGEST] Upload failed for batch {} (job {})",
                    batch.index(),
                    redact_id(job.id())
                );
                jobs.push(job);
                return Err(PartialSubmission {
                    job_ids: job_ids(&jobs),
                    error,
                });
            }

            jobs.push(job);
        }

        Ok(jobs)
    }

    /// Records Salesforce processed successfully, with `sf__Id` and
    /// `sf__Created` columns.
    pub async fn successful_results(&self, job_id: &str) -> Result<Vec<Record>, Error> {
        self.fetch_results(job_id, "successfulResults").await
    }

    /// Records that failed, with `sf__Id` and `sf__Error` columns.
    pub async fn failed_results(&self, job_id: &str) -> Result<Vec<Record>, Error> {
        self.fetch_results(job_id, "failedResults").await
    }

    /// Records never processed because the job was aborted or failed.
    pub async fn unprocessed_results(&self, job_id: &str) -> Result<Vec<Record>, Error> {
        self.fetch_results(job_id, "unprocessedrecords").await
    }

    /// Builds the outcome of a finished job, including its result rows when
    /// the job completed.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnexpectedJobState` if the job is still in flight.
    pub async fn job_outcome(&self, job_id: &str) -> Result<JobOutcome, Error> {
        let info = self.get_job_info(job_id).await?;

        if !info.state.is_terminal() {
            return Err(Error::UnexpectedJobState {
                job_id: info.id,
                state: info.state.to_string(),
                expected: "a terminal state".to_string(),
            });
        }

        let completed = info.state == JobState::JobComplete;
        let mut outcome = JobOutcome::from_info(info);

        if completed {
            outcome.successful = Some(self.successful_results(job_id).await?);
            outcome.failed = Some(self.failed_results(job_id).await?);
        }

        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Private Helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn fetch_results(&self, job_id: &str, result_type: &str) -> Result<Vec<Record>, Error> {
        let path = format!(
            "{}/{}",
            JobKind::Ingest.job_path(&self.client.data_path(), job_id),
            result_type
        );

        info!(
            "[BULK-INGEST] GET /jobs/ingest/{}/{}",
            redact_id(job_id),
            result_type
        );

        let response = self
            .client
            .execute(&ApiRequest::get(path).accept(CONTENT_TYPE_CSV))
            .await?;

        csv_to_records(response.body())
    }
}

fn job_ids(jobs: &[BulkJob]) -> Vec<String> {
    jobs.iter().map(|job| job.id().to_string()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
