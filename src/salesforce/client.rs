//! Resilient Salesforce transport with safe logging.
//!
//! [`SalesforceClient::execute`] performs one logical API exchange: it
//! attaches the bearer credential, optionally gzips the body, decompresses
//! gzip responses, and on an `INVALID_SESSION_ID` error refreshes the
//! credential through the [`Authenticator`] and re-issues the identical
//! request exactly once.

use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT,
};
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, RemoteError, REQUEST_LIMIT_EXCEEDED};
use crate::salesforce::auth::{Authenticator, Credential};
use crate::salesforce::compression;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "refresh_token",
    "client_secret",
    "code",
    "token",
    "sid",
    "session",
    "authorization",
];

pub(crate) const CONTENT_TYPE_JSON: &str = "application/json";
pub(crate) const CONTENT_TYPE_CSV: &str = "text/csv";

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/services/data/v60.0/jobs/ingest`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/services/data/v60.0/jobs/query/750xx/results?locator=MTAwMDA`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Determines if a query parameter key is sensitive and should be redacted.
fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging based on the specified mode.
///
/// The result never contains the scheme, host, or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ApiRequest / ApiResponse
// ─────────────────────────────────────────────────────────────────────────────

/// One API exchange, described independently of the credential so that it
/// can be re-issued unchanged after a refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    content_type: &'static str,
    accept: &'static str,
}

impl ApiRequest {
    /// Creates a request for a path relative to the instance URL.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            content_type: CONTENT_TYPE_JSON,
            accept: CONTENT_TYPE_JSON,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Sets a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, Error> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidRecord(format!("Failed to serialize request body: {}", e)))?;
        self.body = Some(bytes);
        self.content_type = CONTENT_TYPE_JSON;
        Ok(self)
    }

    /// Sets a CSV body.
    pub fn csv(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self.content_type = CONTENT_TYPE_CSV;
        self
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets the `Accept` header.
    pub fn accept(mut self, media_type: &'static str) -> Self {
        self.accept = media_type;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A fully read, decompressed 2xx response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as text, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Deserializes the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::UnexpectedResponse(format!("Failed to parse response: {}", e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Bodies
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of a Salesforce error list. Top-level errors carry `errorCode`,
/// sObject collection results carry `statusCode`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(alias = "statusCode")]
    pub error_code: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Maps a non-2xx response to an [`Error`], keeping the raw body.
pub(crate) fn parse_error_response(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Error {
    let raw = String::from_utf8_lossy(body).into_owned();
    let first_error = serde_json::from_slice::<Vec<ApiErrorBody>>(body)
        .ok()
        .and_then(|errors| errors.into_iter().next());

    let remote = match first_error {
        Some(error) => RemoteError {
            status: status.as_u16(),
            code: error.error_code,
            message: error.message,
            fields: error.fields,
            raw,
        },
        None => RemoteError {
            status: status.as_u16(),
            code: format!("HTTP_{}", status.as_u16()),
            message: status.canonical_reason().unwrap_or("Unknown error").to_string(),
            fields: Vec::new(),
            raw,
        },
    };

    if status == StatusCode::TOO_MANY_REQUESTS || remote.code == REQUEST_LIMIT_EXCEEDED {
        let retry_after_secs = headers
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        return Error::RateLimited {
            retry_after_secs,
            remote,
        };
    }

    Error::Salesforce(remote)
}

// ─────────────────────────────────────────────────────────────────────────────
// SalesforceClient
// ─────────────────────────────────────────────────────────────────────────────

/// Thread-safe HTTP transport for Salesforce API interactions.
///
/// Cheap to clone; clones share the HTTP connection pool and the
/// authenticator.
#[derive(Clone)]
pub struct SalesforceClient {
    /// The underlying HTTP client.
    http: reqwest::Client,
    /// Credential source, shared with every component built on this client.
    auth: Arc<dyn Authenticator>,
    config: ClientConfig,
}

impl std::fmt::Debug for SalesforceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceClient")
            .field("config", &self.config)
            .field("grant_flow", &self.auth.grant_flow())
            .finish()
    }
}

impl SalesforceClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the HTTP client fails to initialize.
    pub fn new(auth: Arc<dyn Authenticator>, config: ClientConfig) -> Result<Self, Error> {
        let http = build_http_client(&config)?;
        Ok(Self { http, auth, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The `/services/data/vXX.X` prefix for this client's API version.
    pub fn data_path(&self) -> String {
        self.config.data_path()
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.auth
    }

    /// Builds a full URL by joining the path with the current instance URL.
    ///
    /// # Errors
    ///
    /// - `Error::NotAuthenticated` - No credential or an empty instance URL
    /// - `Error::Config` - The instance URL or path cannot be parsed
    pub async fn build_url(&self, path: &str) -> Result<Url, Error> {
        let credential = self.auth.current_credential().await?;
        join_url(&credential.instance_url, path, &[])
    }

    /// Executes an authenticated request with one-shot credential refresh.
    ///
    /// A non-2xx response becomes an error carrying the raw body. When that
    /// error is `INVALID_SESSION_ID` and the request has not been retried
    /// yet, the credential is refreshed and the identical request re-issued.
    /// A refresh failure is returned as is; a second session error is not
    /// retried again.
    ///
    /// # Errors
    ///
    /// - `Error::NotAuthenticated` - No credential available
    /// - `Error::ConnectionFailed` - Network error
    /// - `Error::Decompression` - Malformed gzip response
    /// - `Error::Salesforce` / `Error::RateLimited` - Remote-reported error
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, Error> {
        let mut retried = false;

        loop {
            let credential = self.auth.current_credential().await?;
            let response = self.send_once(request, &credential).await?;

            if response.status.is_success() {
                return Ok(response);
            }

            let error = parse_error_response(response.status, &response.headers, &response.body);
            let session_expired = error.remote().is_some_and(RemoteError::is_session_expired);

            if session_expired && !retried {
                info!("[SFDC] Session expired, refreshing credential and retrying once");
                self.auth.refresh().await?;
                retried = true;
                continue;
            }

            if session_expired {
                warn!("[SFDC] Still unauthorized after credential refresh");
            }
            return Err(error);
        }
    }

    /// Sends one request without retry. Non-2xx responses are returned, not
    /// converted to errors.
    async fn send_once(
        &self,
        request: &ApiRequest,
        credential: &Credential,
    ) -> Result<ApiResponse, Error> {
        let url = join_url(&credential.instance_url, &request.path, &request.query)?;
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(&url, self.config.logging_mode);

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .bearer_auth(credential.access_token.expose_secret())
            .header(ACCEPT, request.accept);

        if self.config.compression {
            builder = builder.header(ACCEPT_ENCODING, compression::GZIP);
        }

        if let Some(body) = &request.body {
            builder = builder.header(CONTENT_TYPE, request.content_type);
            builder = if self.config.compression {
                builder
                    .header(CONTENT_ENCODING, compression::GZIP)
                    .body(compression::gzip(body)?)
            } else {
                builder.body(body.clone())
            };
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(_) => {
                // Never expose the raw reqwest error, it may carry the full URL.
                info!(
                    "[SFDC] {} {} FAILED {}ms",
                    request.method,
                    sanitized_url,
                    start.elapsed().as_millis()
                );
                return Err(Error::ConnectionFailed(
                    "Connection to Salesforce failed".to_string(),
                ));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|_| {
            Error::ConnectionFailed("Failed to read Salesforce response".to_string())
        })?;

        info!(
            "[SFDC] {} {} {} {}ms {}",
            request.method,
            sanitized_url,
            status.as_u16(),
            start.elapsed().as_millis(),
            headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
        );

        let body = if compression::is_gzip_encoded(&headers) {
            compression::gunzip(&body)?
        } else {
            body.to_vec()
        };

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Joins an API path and query onto an instance URL.
fn join_url(instance_url: &str, path: &str, query: &[(String, String)]) -> Result<Url, Error> {
    if instance_url.is_empty() {
        return Err(Error::NotAuthenticated);
    }

    let base =
        Url::parse(instance_url).map_err(|_| Error::Config("Invalid instance URL".to_string()))?;

    let mut url = base
        .join(path)
        .map_err(|_| Error::Config(format!("Invalid path: {}", path)))?;

    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }

    Ok(url)
}

/// Builds the configured HTTP client.
fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, Error> {
    let user_agent = HeaderValue::from_str(&config.user_agent)
        .map_err(|_| Error::Config("Invalid user agent".to_string()))?;

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, user_agent);

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, INVALID_SESSION_ID};
    use crate::salesforce::auth::{AuthConfig, OAuthAuthenticator};
    use crate::salesforce::testing;
    use secrecy::SecretString;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const LIMITS_PATH: &str = "/services/data/v60.0/limits";

    fn session_expired_body() -> serde_json::Value {
        serde_json::json!([{
            "message": "Session expired or invalid",
            "errorCode": INVALID_SESSION_ID
        }])
    }

    /// Mounts a token endpoint that issues `first` then `second` and returns
    /// a client whose authenticator already holds `first`.
    async fn refreshing_client(mock_server: &MockServer, config: ClientConfig) -> SalesforceClient {
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "first",
                "instance_url": mock_server.uri()
            })))
            .up_to_n_times(1)
            .mount(mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "second",
                "instance_url": mock_server.uri()
            })))
            .mount(mock_server)
            .await;

        let auth_config = AuthConfig::default()
            .with_login_url(mock_server.uri())
            .with_client("cid", SecretString::from("cs".to_string()));
        let auth = OAuthAuthenticator::connect(auth_config).await.unwrap();
        SalesforceClient::new(Arc::new(auth), config).unwrap()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retry Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn expired_session_refreshes_and_retries_once() {
        let mock_server = MockServer::start().await;
        let client = refreshing_client(&mock_server, ClientConfig::default()).await;

        Mock::given(method("GET"))
            .and(path(LIMITS_PATH))
            .and(header("Authorization", "Bearer first"))
            .respond_with(ResponseTemplate::new(401).set_body_json(session_expired_body()))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path(LIMITS_PATH))
            .and(header("Authorization", "Bearer second"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = client.execute(&ApiRequest::get(LIMITS_PATH)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn second_session_error_is_surfaced_not_retried() {
        let mock_server = MockServer::start().await;
        let client = refreshing_client(&mock_server, ClientConfig::default()).await;

        Mock::given(method("GET"))
            .and(path(LIMITS_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(session_expired_body()))
            .expect(2)
            .mount(&mock_server)
            .await;

        let err = client.execute(&ApiRequest::get(LIMITS_PATH)).await.unwrap_err();

        let remote = err.remote().expect("remote error");
        assert_eq!(remote.code, INVALID_SESSION_ID);
        assert_eq!(remote.status, 401);
        assert!(remote.raw.contains("Session expired or invalid"));

        // one initial grant plus exactly one refresh
        let token_calls = mock_server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/services/oauth2/token")
            .count();
        assert_eq!(token_calls, 2);
    }

    #[tokio::test]
    async fn refresh_failure_is_surfaced() {
        let mock_server = MockServer::start().await;
        let auth = OAuthAuthenticator::with_token(
            mock_server.uri(),
            SecretString::from("stale".to_string()),
        )
        .unwrap();
        let client = SalesforceClient::new(Arc::new(auth), ClientConfig::default()).unwrap();

        Mock::given(method("GET"))
            .and(path(LIMITS_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(session_expired_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client.execute(&ApiRequest::get(LIMITS_PATH)).await.unwrap_err();

        assert!(matches!(err, Error::SessionExpired));
    }

    #[tokio::test]
    async fn other_remote_errors_are_not_retried() {
        let mock_server = MockServer::start().await;
        let client = refreshing_client(&mock_server, ClientConfig::default()).await;

        Mock::given(method("POST"))
            .and(path("/services/data/v60.0/jobs/ingest"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!([{
                "errorCode": "INVALIDJOB",
                "message": "Unable to find object: Acount"
            }])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = ApiRequest::post("/services/data/v60.0/jobs/ingest")
            .json(&serde_json::json!({"object": "Acount"}))
            .unwrap();
        let err = client.execute(&request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Remote);
        let remote = err.remote().unwrap();
        assert_eq!(remote.code, "INVALIDJOB");
        assert_eq!(remote.message, "Unable to find object: Acount");
        assert!(remote.raw.contains("INVALIDJOB"));
        assert!(err.to_string().contains("[INVALIDJOB]"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request / Response Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn request_carries_bearer_query_and_content_type() {
        let mock_server = MockServer::start().await;
        let client = testing::client_for(&mock_server);

        Mock::given(method("PUT"))
            .and(path("/services/data/v60.0/jobs/ingest/750x/batches"))
            .and(query_param("flag", "a b"))
            .and(header("Authorization", "Bearer test_token"))
            .and(header("Content-Type", "text/csv"))
            .and(body_string_contains("Name\nAcme"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = ApiRequest::put("/services/data/v60.0/jobs/ingest/750x/batches")
            .query("flag", "a b")
            .csv(b"Name\nAcme\n".to_vec());
        let response = client.execute(&request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn compression_gzips_request_and_decodes_response() {
        let mock_server = MockServer::start().await;
        let client = testing::client_with_config(
            &mock_server,
            ClientConfig::default().with_compression(true),
        );
        let payload = serde_json::json!({"object": "Account", "operation": "insert"});
        let expected = serde_json::to_vec(&payload).unwrap();

        Mock::given(method("POST"))
            .and(path("/services/data/v60.0/jobs/ingest"))
            .and(header("Content-Encoding", "gzip"))
            .and(header("Accept-Encoding", "gzip"))
            .and(move |req: &Request| {
                compression::gunzip(&req.body)
                    .map(|body| body == expected)
                    .unwrap_or(false)
            })
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Encoding", "gzip")
                    .set_body_raw(
                        compression::gzip(br#"{"id":"750xx","state":"Open"}"#).unwrap(),
                        "application/json",
                    ),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = ApiRequest::post("/services/data/v60.0/jobs/ingest")
            .json(&payload)
            .unwrap();
        let response = client.execute(&request).await.unwrap();

        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["id"], "750xx");
    }

    #[tokio::test]
    async fn gzip_response_is_decoded_without_compression_enabled() {
        let mock_server = MockServer::start().await;
        let client = testing::client_for(&mock_server);

        Mock::given(method("GET"))
            .and(path(LIMITS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Encoding", "gzip")
                    .set_body_raw(compression::gzip(b"Id\n001\n").unwrap(), "text/csv"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = client.execute(&ApiRequest::get(LIMITS_PATH)).await.unwrap();
        assert_eq!(response.body(), b"Id\n001\n");
    }

    #[tokio::test]
    async fn gzip_error_body_is_decoded_before_parsing() {
        let mock_server = MockServer::start().await;
        let client = testing::client_for(&mock_server);

        let body = serde_json::to_vec(&serde_json::json!([{
            "errorCode": "INVALID_FIELD",
            "message": "No such column 'Nope'",
            "fields": ["Nope"]
        }]))
        .unwrap();

        Mock::given(method("GET"))
            .and(path(LIMITS_PATH))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header("Content-Encoding", "gzip")
                    .set_body_raw(compression::gzip(&body).unwrap(), "application/json"),
            )
            .mount(&mock_server)
            .await;

        let err = client.execute(&ApiRequest::get(LIMITS_PATH)).await.unwrap_err();
        let remote = err.remote().unwrap();
        assert_eq!(remote.code, "INVALID_FIELD");
        assert_eq!(remote.fields, vec!["Nope".to_string()]);
    }

    #[tokio::test]
    async fn rate_limited_error() {
        let mock_server = MockServer::start().await;
        let client = testing::client_for(&mock_server);

        Mock::given(method("GET"))
            .and(path(LIMITS_PATH))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "60")
                    .set_body_string("Too many requests from this client"),
            )
            .mount(&mock_server)
            .await;

        match client.execute(&ApiRequest::get(LIMITS_PATH)).await.unwrap_err() {
            Error::RateLimited {
                retry_after_secs,
                remote,
            } => {
                assert_eq!(retry_after_secs, Some(60));
                assert_eq!(remote.status, 429);
                assert_eq!(remote.code, "HTTP_429");
                assert_eq!(remote.raw, "Too many requests from this client");
            }
            e => panic!("Expected RateLimited, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn request_limit_body_keeps_raw_payload() {
        let mock_server = MockServer::start().await;
        let client = testing::client_for(&mock_server);
        let body = r#"[{"errorCode":"REQUEST_LIMIT_EXCEEDED","message":"TotalRequests Limit exceeded."}]"#;

        Mock::given(method("GET"))
            .and(path(LIMITS_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_string(body))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client.execute(&ApiRequest::get(LIMITS_PATH)).await.unwrap_err();

        assert!(matches!(err, Error::RateLimited { retry_after_secs: None, .. }));
        let remote = err.remote().unwrap();
        assert_eq!(remote.status, 403);
        assert_eq!(remote.code, "REQUEST_LIMIT_EXCEEDED");
        assert_eq!(remote.message, "TotalRequests Limit exceeded.");
        assert_eq!(remote.raw, body);
    }

    #[tokio::test]
    async fn unparseable_error_body_falls_back_to_http_status() {
        let mock_server = MockServer::start().await;
        let client = testing::client_for(&mock_server);

        Mock::given(method("GET"))
            .and(path(LIMITS_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("<html>down</html>"))
            .mount(&mock_server)
            .await;

        let err = client.execute(&ApiRequest::get(LIMITS_PATH)).await.unwrap_err();
        let remote = err.remote().unwrap();
        assert_eq!(remote.code, "HTTP_503");
        assert_eq!(remote.raw, "<html>down</html>");
    }

    #[tokio::test]
    async fn connection_failure_is_transport_error() {
        let auth = OAuthAuthenticator::with_token(
            "http://127.0.0.1:1",
            SecretString::from("t".to_string()),
        )
        .unwrap();
        let client = SalesforceClient::new(Arc::new(auth), ClientConfig::default()).unwrap();

        let err = client.execute(&ApiRequest::get(LIMITS_PATH)).await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn build_url_joins_instance_and_path() {
        let auth = OAuthAuthenticator::with_token(
            "https://na1.salesforce.com",
            SecretString::from("t".to_string()),
        )
        .unwrap();
        let client = SalesforceClient::new(Arc::new(auth), ClientConfig::default()).unwrap();

        let url = client.build_url("/services/data/v60.0/query").await.unwrap();
        assert_eq!(url.as_str(), "https://na1.salesforce.com/services/data/v60.0/query");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // URL Sanitization Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn sanitize_strips_scheme_host_and_fragment() {
        let url = Url::parse("https://na1.salesforce.com/services/data/v60.0/query?q=x#frag").unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);

        assert_eq!(result, "/services/data/v60.0/query");
        assert!(!result.contains("na1.salesforce.com"));
        assert!(!result.contains("frag"));
    }

    #[test]
    fn path_and_query_redacted_keeps_locator_and_hides_tokens() {
        let url = Url::parse(
            "https://na1.salesforce.com/jobs/query/750/results?locator=MTAwMDA&access_token=secret123&SID=sess456",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

        assert!(result.starts_with("/jobs/query/750/results?"));
        assert!(result.contains("locator=MTAwMDA"));
        assert!(result.contains("access_token=***"));
        assert!(result.contains("SID=***"));
        assert!(!result.contains("secret123"));
        assert!(!result.contains("sess456"));
    }

    #[test]
    fn is_sensitive_param_is_exact_and_case_insensitive() {
        for param in SENSITIVE_QUERY_PARAMS {
            assert!(is_sensitive_param(param));
            assert!(is_sensitive_param(&param.to_ascii_uppercase()));
        }
        assert!(!is_sensitive_param("access_token_id"));
        assert!(!is_sensitive_param("locator"));
        assert!(!is_sensitive_param("maxRecords"));
    }

    #[test]
    fn logging_mode_default_is_path_only() {
        assert_eq!(LoggingMode::default(), LoggingMode::PathOnly);
    }
}
