//! Salesforce transport and bulk orchestration layer.
//!
//! - **Resilient transport** (`client`) with gzip and a single
//!   refresh-and-retry on an expired session
//! - **Composite multiplexing** of sObject collection calls (`composite`)
//! - **Bulk API v2** ingest and query job lifecycles (`bulk_ingest_v2`,
//!   `bulk_query_v2`), paginated result collection and streaming
//! - **Completion polling** across many jobs at once (`poller`)

pub mod auth;
pub mod bulk_ingest_v2;
pub mod bulk_query_v2;
pub mod client;
pub mod composite;
pub mod compression;
pub mod job;
pub mod poller;
pub mod refresh;
pub mod result_iterator;

use std::sync::Arc;

pub use auth::{AuthConfig, Authenticator, Credential, GrantFlow, JwtClaims, JwtSigner, LoginType, OAuthAuthenticator};
pub use bulk_ingest_v2::{BulkIngestV2Client, BulkOperation, IngestJobSpec, PartialSubmission};
pub use bulk_query_v2::{BulkQueryV2Client, QueryOperation, QueryResults, ResultPage};
pub use client::{sanitize_url_for_logs, ApiRequest, ApiResponse, LoggingMode, SalesforceClient};
pub use composite::{CompositeClient, CompositeResponse, OperationError, OperationResult};
pub use job::{BulkJob, JobInfo, JobKind, JobOutcome, JobState};
pub use poller::CompletionPoller;
pub use result_iterator::ResultIterator;

use crate::config::{ClientConfig, PollConfig};
use crate::error::Error;

/// Redacts a job ID for logging (shows first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((end, _)) => format!("{}...", &id[..end]),
        None => id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkClient
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point bundling every orchestration component over one transport.
#[derive(Debug, Clone)]
pub struct BulkClient {
    client: SalesforceClient,
}

impl BulkClient {
    /// Creates the transport from an authenticator and configuration.
    pub fn new(auth: Arc<dyn Authenticator>, config: ClientConfig) -> Result<Self, Error> {
        Ok(Self {
            client: SalesforceClient::new(auth, config)?,
        })
    }

    /// Wraps an existing transport.
    pub fn from_client(client: SalesforceClient) -> Self {
        Self { client }
    }

    pub fn transport(&self) -> &SalesforceClient {
        &self.client
    }

    pub fn ingest(&self) -> BulkIngestV2Client {
        BulkIngestV2Client::new(self.client.clone())
    }

    pub fn query(&self) -> BulkQueryV2Client {
        BulkQueryV2Client::new(self.client.clone())
    }

    pub fn composite(&self) -> CompositeClient {
        CompositeClient::new(self.client.clone())
    }

    pub fn poller(&self, config: PollConfig) -> CompletionPoller {
        CompletionPoller::new(self.client.clone(), config)
    }
}
