//! Lazy, page-at-a-time iteration over query job results.

use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::Error;
use crate::salesforce::bulk_query_v2::{BulkQueryV2Client, ResultPage};
use crate::salesforce::redact_id;
use crate::streaming::record_codec::decode_rows;

/// Walks a query job's result pages one at a time.
///
/// A page is only fetched when [`advance`](Self::advance) is called, and the
/// previous page is released before the next fetch starts, so at most one
/// page is held in memory. The iterator cannot be restarted; once
/// `advance` returns `false`, create a new one.
///
/// ```ignore
/// let mut pages = bulk.query().results_iter(job.id(), Some(50_000));
/// let mut rows: Vec<Account> = Vec::new();
/// while pages.advance().await {
///     pages.decode(&mut rows)?;
/// }
/// if let Some(err) = pages.error() {
///     return Err(...);
/// }
/// ```
#[derive(Debug)]
pub struct ResultIterator {
    client: BulkQueryV2Client,
    job_id: String,
    max_records: Option<u64>,
    /// Locator of the next page, once a page has been fetched.
    next_locator: Option<String>,
    current: Option<ResultPage>,
    pages_fetched: usize,
    done: bool,
    error: Option<Error>,
}

impl ResultIterator {
    pub(crate) fn new(client: BulkQueryV2Client, job_id: String, max_records: Option<u64>) -> Self {
        Self {
            client,
            job_id,
            max_records,
            next_locator: None,
            current: None,
            pages_fetched: 0,
            done: false,
            error: None,
        }
    }

    /// Fetches the next page. Returns `false` when there are no more pages
    /// or a fetch failed; check [`error`](Self::error) to tell them apart.
    pub async fn advance(&mut self) -> bool {
        self.current = None;

        if self.done || self.error.is_some() {
            return false;
        }
        if self.pages_fetched > 0 && self.next_locator.is_none() {
            self.done = true;
            return false;
        }

        let locator = self.next_locator.take();
        match self
            .client
            .get_results_page(&self.job_id, locator.as_deref(), self.max_records)
            .await
        {
            Ok(page) => {
                self.pages_fetched += 1;
                self.next_locator = page.locator().map(str::to_string);
                self.current = Some(page);
                true
            }
            Err(e) => {
                info!(
                    "[BULK-QUERY] Result iteration for job {} stopped after {} page(s)",
                    redact_id(&self.job_id),
                    self.pages_fetched
                );
                self.error = Some(e);
                false
            }
        }
    }

    /// Decodes the current page's rows and appends them to `into`.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidRecord` - called without a current page
    /// - `Error::CsvDecode` - a row does not fit `T`; iteration stops
    pub fn decode<T: DeserializeOwned>(&mut self, into: &mut Vec<T>) -> Result<(), Error> {
        let page = self.current.as_ref().ok_or_else(|| {
            Error::InvalidRecord("No current result page; call advance first".to_string())
        })?;

        match decode_rows::<T>(page.body()) {
            Ok(rows) => {
                into.extend(rows);
                Ok(())
            }
            Err(Error::CsvDecode(message)) => {
                self.error = Some(Error::CsvDecode(message.clone()));
                Err(Error::CsvDecode(message))
            }
            Err(other) => Err(other),
        }
    }

    /// The current page, if `advance` last returned `true`.
    pub fn page(&self) -> Option<&ResultPage> {
        self.current.as_ref()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// The error that ended iteration, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salesforce::testing;
    use serde::Deserialize;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS_PATH: &str = "/services/data/v60.0/jobs/query/750xx000000001ABC/results";

    #[derive(Debug, Deserialize, PartialEq)]
    struct Account {
        #[serde(rename = "Id")]
        id: String,
        #[serde(rename = "NumberOfEmployees")]
        employees: u32,
    }

    fn iterator_for(mock_server: &MockServer) -> ResultIterator {
        BulkQueryV2Client::new(testing::client_for(mock_server)).results_iter("750xx000000001ABC", None)
    }

    fn page(body: &str, locator: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("Sforce-Locator", locator)
            .set_body_string(body)
    }

    #[tokio::test]
    async fn test_iterates_pages_lazily_and_decodes_typed_rows() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .and(query_param("locator", "p2"))
            .respond_with(page("Id,NumberOfEmployees\n001B,20\n", "null"))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .respond_with(page("Id,NumberOfEmployees\n001A,10\n", "p2"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut pages = iterator_for(&mock_server);
        assert!(mock_server.received_requests().await.unwrap().is_empty());

        let mut rows: Vec<Account> = Vec::new();
        assert!(pages.advance().await);
        pages.decode(&mut rows).unwrap();
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);

        assert!(pages.advance().await);
        pages.decode(&mut rows).unwrap();

        assert!(!pages.advance().await);
        assert!(pages.error().is_none());
        assert!(pages.page().is_none());
        assert_eq!(pages.pages_fetched(), 2);
        assert_eq!(
            rows,
            vec![
                Account { id: "001A".into(), employees: 10 },
                Account { id: "001B".into(), employees: 20 },
            ]
        );

        // Exhausted iterators stay exhausted without further requests.
        assert!(!pages.advance().await);
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_is_exposed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut pages = iterator_for(&mock_server);

        assert!(!pages.advance().await);
        assert_eq!(pages.error().unwrap().remote().unwrap().status, 500);
        assert!(!pages.advance().await);
    }

    #[tokio::test]
    async fn test_decode_error_stops_iteration() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .respond_with(page("Id,NumberOfEmployees\n001A,lots\n", "p2"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut pages = iterator_for(&mock_server);
        let mut rows: Vec<Account> = Vec::new();

        assert!(pages.advance().await);
        assert!(matches!(pages.decode(&mut rows), Err(Error::CsvDecode(_))));
        assert!(matches!(pages.error(), Some(Error::CsvDecode(_))));
        assert!(!pages.advance().await);
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_decode_without_page_is_misuse() {
        let mock_server = MockServer::start().await;
        let mut pages = iterator_for(&mock_server);
        let mut rows: Vec<Account> = Vec::new();

        let err = pages.decode(&mut rows).unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }
}
