//! Crate-wide error type.
//!
//! Every error resolves to one of four kinds: validation (nothing was sent),
//! transport (network or HTTP plumbing), remote (Salesforce reported it), or
//! timeout (the completion poller gave up).

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate credential material in a message.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "refresh_token",
    "access_token",
    "client_secret",
    "authorization:",
    "assertion=",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Returns the message, or the fallback if sensitive content is detected.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Error code Salesforce uses for an expired or revoked session.
pub const INVALID_SESSION_ID: &str = "INVALID_SESSION_ID";

/// Error code Salesforce uses when the org's API request limit is exhausted.
pub const REQUEST_LIMIT_EXCEEDED: &str = "REQUEST_LIMIT_EXCEEDED";

// ─────────────────────────────────────────────────────────────────────────────
// RemoteError
// ─────────────────────────────────────────────────────────────────────────────

/// A structured error reported by Salesforce in a non-2xx response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteError {
    /// HTTP status of the response that carried the error.
    pub status: u16,
    /// Salesforce error code (e.g. `INVALID_FIELD`), or `HTTP_<status>`
    /// when the body was not a recognizable error payload.
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Fields the error refers to, if any.
    pub fields: Vec<String>,
    /// Raw response body, kept for caller diagnostics.
    pub raw: String,
}

impl RemoteError {
    /// Returns true if this error signals an expired or invalid session.
    pub fn is_session_expired(&self) -> bool {
        self.code == INVALID_SESSION_ID
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ErrorKind
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Detected before any I/O; nothing was sent.
    Validation,
    /// Network or HTTP-level failure.
    Transport,
    /// Structured error reported by the remote service.
    Remote,
    /// The completion poller's deadline elapsed.
    Timeout,
}

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    // ── Validation ────────────────────────────────────────────────────────────
    #[error("Invalid batch size {size}: must be between 1 and {max}")]
    InvalidBatchSize { size: usize, max: usize },

    #[error("Request needs {count} composite sub-requests, the limit is {max}")]
    TooManySubrequests { count: usize, max: usize },

    #[error("Record {index} has no value for required identifier field '{field}'")]
    MissingIdentifier { index: usize, field: String },

    #[error("Record {index} has no value for external id field '{field}'")]
    MissingExternalId { index: usize, field: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidJobTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("Failed to encode CSV: {0}")]
    CsvEncode(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid configuration: {0}")]
    Config(String),

    // ── Transport ─────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to compress request: {0}")]
    Compression(String),

    #[error("Failed to decompress response: {0}")]
    Decompression(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A result page from the server could not be decoded.
    #[error("Failed to decode CSV: {0}")]
    CsvDecode(String),

    // ── Remote ────────────────────────────────────────────────────────────────
    #[error("Salesforce error: {0}")]
    Salesforce(RemoteError),

    #[error("Session expired")]
    SessionExpired,

    #[error("Rate limited: {remote}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        remote: RemoteError,
    },

    #[error("Bulk job {job_id} ended in {state}: {message}")]
    JobFailed {
        job_id: String,
        state: String,
        failed_records: u64,
        message: String,
    },

    #[error("Bulk job {job_id} is {state}, expected {expected}")]
    UnexpectedJobState {
        job_id: String,
        state: String,
        expected: String,
    },

    // ── Timeout ───────────────────────────────────────────────────────────────
    #[error("Bulk job {job_id} did not finish within {waited:?}")]
    Timeout { job_id: String, waited: Duration },
}

impl Error {
    /// Classifies the error into one of the four caller-facing kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidBatchSize { .. }
            | Error::TooManySubrequests { .. }
            | Error::MissingIdentifier { .. }
            | Error::MissingExternalId { .. }
            | Error::InvalidRecord(_)
            | Error::InvalidJobTransition { .. }
            | Error::CsvEncode(_)
            | Error::NotAuthenticated
            | Error::Config(_) => ErrorKind::Validation,

            Error::ConnectionFailed(_)
            | Error::Compression(_)
            | Error::Decompression(_)
            | Error::UnexpectedResponse(_)
            | Error::CsvDecode(_) => ErrorKind::Transport,

            Error::Salesforce(_)
            | Error::SessionExpired
            | Error::RateLimited { .. }
            | Error::JobFailed { .. }
            | Error::UnexpectedJobState { .. } => ErrorKind::Remote,

            Error::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Returns the structured remote error, if this is one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Error::Salesforce(remote) | Error::RateLimited { remote, .. } => Some(remote),
            _ => None,
        }
    }

    /// Returns a message that is safe to show or log.
    /// Never leaks secrets, tokens, or assertions.
    pub fn safe_message(&self) -> String {
        match self {
            Error::Salesforce(remote) => {
                sanitize_message(&remote.to_string(), "A Salesforce error occurred.")
            }
            Error::ConnectionFailed(msg) => {
                sanitize_message(msg, "Could not connect to Salesforce.")
            }
            Error::JobFailed { message, .. } => {
                sanitize_message(message, "The bulk operation failed.")
            }
            other => sanitize_message(&other.to_string(), "Something went wrong."),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(code: &str) -> RemoteError {
        RemoteError {
            status: 401,
            code: code.into(),
            message: "Session expired or invalid".into(),
            fields: Vec::new(),
            raw: String::new(),
        }
    }

    #[test]
    fn every_variant_has_a_kind() {
        let cases = vec![
            (Error::InvalidBatchSize { size: 0, max: 200 }, ErrorKind::Validation),
            (Error::TooManySubrequests { count: 26, max: 25 }, ErrorKind::Validation),
            (
                Error::MissingIdentifier { index: 3, field: "Id".into() },
                ErrorKind::Validation,
            ),
            (Error::CsvEncode("bad quote".into()), ErrorKind::Validation),
            (Error::CsvDecode("unequal lengths".into()), ErrorKind::Transport),
            (Error::UnexpectedResponse("missing refObj1".into()), ErrorKind::Transport),
            (
                Error::RateLimited {
                    retry_after_secs: Some(5),
                    remote: remote(REQUEST_LIMIT_EXCEEDED),
                },
                ErrorKind::Remote,
            ),
            (Error::ConnectionFailed("reset".into()), ErrorKind::Transport),
            (Error::Compression("write zero".into()), ErrorKind::Transport),
            (Error::Decompression("bad header".into()), ErrorKind::Transport),
            (Error::Salesforce(remote("INVALID_FIELD")), ErrorKind::Remote),
            (Error::SessionExpired, ErrorKind::Remote),
            (
                Error::JobFailed {
                    job_id: "750".into(),
                    state: "Failed".into(),
                    failed_records: 0,
                    message: "x".into(),
                },
                ErrorKind::Remote,
            ),
            (
                Error::Timeout { job_id: "750".into(), waited: Duration::from_secs(60) },
                ErrorKind::Timeout,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.kind(), expected, "wrong kind for {:?}", error);
        }
    }

    #[test]
    fn session_expired_detection_uses_error_code() {
        assert!(remote(INVALID_SESSION_ID).is_session_expired());
        assert!(!remote("INVALID_FIELD").is_session_expired());
    }

    #[test]
    fn remote_error_display_includes_code_and_message() {
        let err = Error::Salesforce(remote("INVALID_FIELD"));
        let text = err.to_string();
        assert!(text.contains("INVALID_FIELD"));
        assert!(text.contains("Session expired or invalid"));
    }

    #[test]
    fn no_secret_leakage_in_safe_message() {
        let cases = vec![
            Error::ConnectionFailed("access_token=xyz client_secret=abc".into()),
            Error::Salesforce(RemoteError {
                status: 400,
                code: "BAD".into(),
                message: "Authorization: Bearer abc".into(),
                fields: Vec::new(),
                raw: String::new(),
            }),
            Error::JobFailed {
                job_id: "750xx".into(),
                state: "Failed".into(),
                failed_records: 0,
                message: "Bearer token invalid".into(),
            },
            Error::Config("assertion=eyJhbGciOi".into()),
        ];

        for error in cases {
            let lower = error.safe_message().to_ascii_lowercase();
            for pattern in SENSITIVE_PATTERNS {
                assert!(
                    !lower.contains(pattern),
                    "{:?} safe message contains sensitive pattern",
                    error
                );
            }
        }
    }
}
