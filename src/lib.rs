//! Batch orchestration and resilient transport for the Salesforce Bulk API v2
//! and Composite API.
//!
//! - [`streaming`] turns typed or generic records into ordered batches and CSV
//! - [`salesforce::SalesforceClient`] sends every request, refreshing an
//!   expired session and retrying once
//! - [`salesforce::CompositeClient`] packs up to 25 batches into one call
//! - [`salesforce::BulkIngestV2Client`] and [`salesforce::BulkQueryV2Client`]
//!   drive bulk jobs and read paginated results
//! - [`salesforce::CompletionPoller`] waits for many jobs at once
//!
//! ```ignore
//! let auth = OAuthAuthenticator::connect(
//!     AuthConfig::for_login(LoginType::Production).with_password(...),
//! )
//! .await?;
//! let bulk = BulkClient::new(Arc::new(auth), ClientConfig::default())?;
//!
//! let spec = IngestJobSpec::new("Account", BulkOperation::Insert);
//! let jobs = bulk.ingest().submit(&spec, records, 10_000).await?;
//! let ids: Vec<String> = jobs.iter().map(|j| j.id().to_string()).collect();
//! bulk.poller(PollConfig::default()).await_all(&ids, JobKind::Ingest).await?;
//! ```

pub mod config;
pub mod error;
pub mod salesforce;
pub mod streaming;

pub use config::{ClientConfig, PollConfig};
pub use error::{Error, ErrorKind, RemoteError, Result};
pub use salesforce::BulkClient;
pub use streaming::{Record, RecordSource};
