//! Salesforce Bulk API v2 Query Client.
//!
//! Creates query jobs and reads their CSV results page by page. Each page's
//! record count and the locator of the next page come from the
//! `Sforce-NumberOfRecords` and `Sforce-Locator` response headers, never
//! from the body.
//!
//! Two ways to consume results:
//! - [`BulkQueryV2Client::collect_results`] fetches every page and merges
//!   them into one CSV with a single header row
//! - [`BulkQueryV2Client::results_iter`] returns a [`ResultIterator`] that
//!   holds at most one page at a time

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;
use crate::salesforce::client::{ApiRequest, SalesforceClient, CONTENT_TYPE_CSV};
use crate::salesforce::job::{
    fetch_job_info, update_job_state, BulkJob, JobInfo, JobInfoWire, JobKind, JobState,
};
use crate::salesforce::redact_id;
use crate::salesforce::result_iterator::ResultIterator;
use crate::streaming::record::Record;
use crate::streaming::record_codec::{csv_to_records, skip_header_row};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Header name for the locator used in result pagination.
const SFORCE_LOCATOR_HEADER: &str = "Sforce-Locator";

/// Header name for the number of records in the current page.
const SFORCE_NUMBER_OF_RECORDS_HEADER: &str = "Sforce-NumberOfRecords";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Query job operation. `QueryAll` includes deleted and archived records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryOperation {
    #[default]
    Query,
    QueryAll,
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct ResultPage {
    body: Vec<u8>,
    locator: Option<String>,
    number_of_records: Option<u64>,
}

impl ResultPage {
    fn from_response(body: Vec<u8>, headers: &HeaderMap) -> Self {
        Self {
            body,
            locator: extract_locator(headers),
            number_of_records: headers
                .get(SFORCE_NUMBER_OF_RECORDS_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok()),
        }
    }

    /// CSV payload of this page, including its header row.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Locator of the next page; `None` on the last page.
    pub fn locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }

    /// Record count reported by Salesforce for this page.
    pub fn number_of_records(&self) -> Option<u64> {
        self.number_of_records
    }

    pub fn is_last(&self) -> bool {
        self.locator.is_none()
    }

    /// Decodes this page's rows.
    pub fn records(&self) -> Result<Vec<Record>, Error> {
        csv_to_records(&self.body)
    }
}

/// All pages of a query job merged into one CSV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResults {
    /// Merged CSV with exactly one header row.
    pub csv: Vec<u8>,
    /// Sum of the per-page record counts reported by Salesforce.
    pub record_count: u64,
    pub pages: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for creating a bulk query job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueryJobRequest<'a> {
    operation: QueryOperation,
    query: &'a str,
    content_type: &'static str,
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkQueryV2Client
// ─────────────────────────────────────────────────────────────────────────────

/// Client for Salesforce Bulk API v2 query operations.
#[derive(Debug, Clone)]
pub struct BulkQueryV2Client {
    client: SalesforceClient,
}

impl BulkQueryV2Client {
    pub fn new(client: SalesforceClient) -> Self {
        Self { client }
    }

    /// Creates a new bulk query job.
    ///
    /// Salesforce starts processing immediately, so the job comes back
    /// `UploadComplete` rather than `Open`.
    ///
    /// # Errors
    ///
    /// - `Error::UnexpectedResponse` - the response carries no job id
    /// - `Error::UnexpectedJobState` - the job is already terminal
    /// - Transport and remote errors (e.g. malformed SOQL)
    pub async fn create_query_job(
        &self,
        soql: &str,
        operation: QueryOperation,
    ) -> Result<BulkJob, Error> {
        let body = CreateQueryJobRequest {
            operation,
            query: soql,
            content_type: "CSV",
        };

        // SOQL may contain literal values; only its length is logged.
        info!(
            "[BULK-QUERY] POST /jobs/query ({:?}, {} chars)",
            operation,
            soql.len()
        );

        let path = JobKind::Query.jobs_path(&self.client.data_path());
        let response = self
            .client
            .execute(&ApiRequest::post(path).json(&body)?)
            .await?;

        let wire: JobInfoWire = response.json()?;
        let info = JobInfo::try_from(wire)?;

        if info.id.trim().is_empty() {
            return Err(Error::UnexpectedResponse(
                "Query job creation response has no job id".to_string(),
            ));
        }
        if info.state.is_terminal() {
            return Err(Error::UnexpectedJobState {
                job_id: info.id,
                state: info.state.to_string(),
                expected: JobState::UploadComplete.to_string(),
            });
        }

        info!("[BULK-QUERY] Created job {}", redact_id(&info.id));
        Ok(BulkJob::new(info.id, JobKind::Query, info.state))
    }

    /// Gets the current status of a query job.
    pub async fn get_job_info(&self, job_id: &str) -> Result<JobInfo, Error> {
        fetch_job_info(&self.client, JobKind::Query, job_id).await
    }

    /// Aborts a query job that is still processing.
    pub async fn abort_job(&self, job: &mut BulkJob) -> Result<(), Error> {
        if !job.state().can_transition_to(JobState::Aborted) {
            return Err(Error::InvalidJobTransition {
                job_id: job.id().to_string(),
                from: job.state().to_string(),
                to: JobState::Aborted.to_string(),
            });
        }

        update_job_state(&self.client, JobKind::Query, job.id(), JobState::Aborted).await?;
        job.transition(JobState::Aborted)
    }

    /// Fetches one page of results.
    ///
    /// `locator` is `None` for the first page and the previous page's
    /// locator afterwards. `max_records` caps the page size.
    pub async fn get_results_page(
        &self,
        job_id: &str,
        locator: Option<&str>,
        max_records: Option<u64>,
    ) -> Result<ResultPage, Error> {
        let path = format!(
            "{}/results",
            JobKind::Query.job_path(&self.client.data_path(), job_id)
        );

        let mut request = ApiRequest::get(path).accept(CONTENT_TYPE_CSV);
        if let Some(locator) = locator {
            request = request.query("locator", locator);
        }
        if let Some(max_records) = max_records {
            request = request.query("maxRecords", max_records.to_string());
        }

        info!(
            "[BULK-QUERY] GET /jobs/query/{}/results{}",
            redact_id(job_id),
            if locator.is_some() { " (next page)" } else { "" }
        );

        let response = self.client.execute(&request).await?;
        let headers = response.headers().clone();
        Ok(ResultPage::from_response(response.into_body(), &headers))
    }

    /// Fetches every page and merges them into one CSV.
    ///
    /// The header row of every page after the first is dropped. Fetching
    /// stops at the first page without a locator, so N pages take exactly
    /// N requests.
    pub async fn collect_results(
        &self,
        job_id: &str,
        max_records: Option<u64>,
    ) -> Result<QueryResults, Error> {
        let mut results = QueryResults::default();
        let mut locator: Option<String> = None;

        loop {
            let page = self
                .get_results_page(job_id, locator.as_deref(), max_records)
                .await?;

            results.record_count += page.number_of_records().unwrap_or(0);
            let body = if results.pages == 0 {
                page.body()
            } else {
                skip_header_row(page.body())
            };
            if results.pages > 0 && !body.is_empty() && !results.csv.ends_with(b"\n") {
                results.csv.push(b'\n');
            }
            results.csv.extend_from_slice(body);
            results.pages += 1;

            info!(
                "[BULK-QUERY] Page {} for job {} ({} bytes)",
                results.pages,
                redact_id(job_id),
                page.body().len()
            );

            match page.locator {
                Some(next) => locator = Some(next),
                None => break,
            }
        }

        info!(
            "[BULK-QUERY] Collected {} records in {} page(s) for job {}",
            results.record_count,
            results.pages,
            redact_id(job_id)
        );

        Ok(results)
    }

    /// Fetches every page and decodes the merged rows.
    pub async fn collect_records(&self, job_id: &str) -> Result<Vec<Record>, Error> {
        let results = self.collect_results(job_id, None).await?;
        csv_to_records(&results.csv)
    }

    /// Returns a lazy iterator over the job's result pages. Nothing is
    /// fetched until the first `advance`.
    pub fn results_iter(&self, job_id: impl Into<String>, max_records: Option<u64>) -> ResultIterator {
        ResultIterator::new(self.clone(), job_id.into(), max_records)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Extracts the next-page locator. Salesforce sends the literal `null` on
/// the last page.
fn extract_locator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SFORCE_LOCATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "null")
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salesforce::testing;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS_PATH: &str = "/services/data/v60.0/jobs/query/750xx000000001ABC/results";

    fn create_test_client(mock_server: &MockServer) -> BulkQueryV2Client {
        BulkQueryV2Client::new(testing::client_for(mock_server))
    }

    fn page(body: &str, locator: &str, count: u64) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("Content-Type", "text/csv")
            .insert_header("Sforce-Locator", locator)
            .insert_header("Sforce-NumberOfRecords", count.to_string().as_str())
            .set_body_string(body)
    }

    #[tokio::test]
    async fn test_create_query_job_sends_correct_body() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server);

        Mock::given(method("POST"))
            .and(path("/services/data/v60.0/jobs/query"))
            .and(body_json(json!({
                "operation": "queryAll",
                "query": "SELECT Id FROM Account",
                "contentType": "CSV"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "750xx000000001ABC",
                "state": "UploadComplete",
                "operation": "queryAll",
                "object": "Account"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let job = client
            .create_query_job("SELECT Id FROM Account", QueryOperation::QueryAll)
            .await
            .unwrap();

        assert_eq!(job.id(), "750xx000000001ABC");
        assert_eq!(job.kind(), JobKind::Query);
        assert_eq!(job.state(), JobState::UploadComplete);
    }

    #[tokio::test]
    async fn test_malformed_query_surfaces_remote_error() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server);

        Mock::given(method("POST"))
            .and(path("/services/data/v60.0/jobs/query"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!([{
                "errorCode": "INVALIDJOB",
                "message": "unexpected token: FORM"
            }])))
            .mount(&mock_server)
            .await;

        let err = client
            .create_query_job("SELECT Id FORM Account", QueryOperation::Query)
            .await
            .unwrap_err();

        let remote = err.remote().unwrap();
        assert_eq!(remote.code, "INVALIDJOB");
        assert!(remote.raw.contains("unexpected token"));
    }

    #[tokio::test]
    async fn test_collect_single_page() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server);

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .respond_with(page("Id,Name\n001A,Acme\n", "null", 1))
            .expect(1)
            .mount(&mock_server)
            .await;

        let results = client.collect_results("750xx000000001ABC", None).await.unwrap();

        assert_eq!(results.csv, b"Id,Name\n001A,Acme\n");
        assert_eq!(results.record_count, 1);
        assert_eq!(results.pages, 1);
    }

    #[tokio::test]
    async fn test_collect_with_pagination_drops_repeated_headers() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server);

        // Locator-specific mocks are mounted first so the unfiltered first
        // page mock only answers the initial request.
        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .and(query_param("locator", "loc3"))
            .respond_with(page("Id,Name\n001E,Eve\n", "null", 1))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .and(query_param("locator", "loc2"))
            .respond_with(page("Id,Name\n001C,Cy\n001D,Di\n", "loc3", 2))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .and(query_param("maxRecords", "2"))
            .respond_with(page("Id,Name\n001A,Al\n001B,Bo\n", "loc2", 2))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;

        let results = client
            .collect_results("750xx000000001ABC", Some(2))
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(results.csv).unwrap(),
            "Id,Name\n001A,Al\n001B,Bo\n001C,Cy\n001D,Di\n001E,Eve\n"
        );
        assert_eq!(results.record_count, 5);
        assert_eq!(results.pages, 3);
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_collect_records_decodes_merged_rows() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server);

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .and(query_param("locator", "next"))
            .respond_with(page("Id,Name\n001B,\"Smith, Jo\"\n", "", 1))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .respond_with(page("Id,Name\n001A,Acme\n", "next", 1))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        let records = client.collect_records("750xx000000001ABC").await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].text("Name").as_deref(), Some("Smith, Jo"));
    }

    #[tokio::test]
    async fn test_page_without_trailing_newline_keeps_rows_apart() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server);

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .and(query_param("locator", "n"))
            .respond_with(page("Id\n001B\n", "null", 1))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .respond_with(page("Id\n001A", "n", 1))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;

        let results = client.collect_results("750xx000000001ABC", None).await.unwrap();
        assert_eq!(results.csv, b"Id\n001A\n001B\n");

        let records = csv_to_records(&results.csv).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text("Id").as_deref(), Some("001A"));
        assert_eq!(records[1].text("Id").as_deref(), Some("001B"));
    }

    #[tokio::test]
    async fn test_results_page_error_propagates() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server);

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!([{
                "errorCode": "NOT_FOUND",
                "message": "The requested resource does not exist"
            }])))
            .mount(&mock_server)
            .await;

        let err = client
            .collect_results("750xx000000001ABC", None)
            .await
            .unwrap_err();
        assert_eq!(err.remote().unwrap().status, 404);
    }

    #[tokio::test]
    async fn test_abort_terminal_query_job_is_rejected() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server);

        let mut job = BulkJob::new("750xx000000001ABC".into(), JobKind::Query, JobState::JobComplete);
        let err = client.abort_job(&mut job).await.unwrap_err();

        assert!(matches!(err, Error::InvalidJobTransition { .. }));
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_extract_locator() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_locator(&headers), None);

        headers.insert(SFORCE_LOCATOR_HEADER, HeaderValue::from_static("null"));
        assert_eq!(extract_locator(&headers), None);

        headers.insert(SFORCE_LOCATOR_HEADER, HeaderValue::from_static(""));
        assert_eq!(extract_locator(&headers), None);

        headers.insert(SFORCE_LOCATOR_HEADER, HeaderValue::from_static("MTAwMDA"));
        assert_eq!(extract_locator(&headers).as_deref(), Some("MTAwMDA"));
    }
}
