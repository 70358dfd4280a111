//! Client and poller configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::salesforce::client::LoggingMode;

/// Default Salesforce API version.
pub const DEFAULT_API_VERSION: &str = "v60.0";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// User agent string for all Salesforce API requests.
pub const CLIENT_USER_AGENT: &str = "stampede-bulk/0.1.0";

/// Default interval between job status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default ceiling on how long a single job is observed.
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(60);

// ─────────────────────────────────────────────────────────────────────────────
// ClientConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Transport settings shared by every orchestration component.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API version path segment, e.g. `v60.0`.
    pub api_version: String,
    /// Whole-request timeout.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Gzip request bodies and ask for gzip responses.
    pub compression: bool,
    /// How URLs are rendered in request logs.
    #[serde(skip)]
    pub logging_mode: LoggingMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: CLIENT_USER_AGENT.to_string(),
            compression: false,
            logging_mode: LoggingMode::default(),
        }
    }
}

impl ClientConfig {
    /// Sets the API version. A missing leading `v` is added.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.api_version = if version.starts_with('v') {
            version
        } else {
            format!("v{}", version)
        };
        self
    }

    /// Enables or disables gzip compression.
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Sets the whole-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the URL logging mode.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    /// Returns the `/services/data/vXX.X` prefix for REST paths.
    pub(crate) fn data_path(&self) -> String {
        format!("/services/data/{}", self.api_version)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PollConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Cadence and deadline for the completion poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Wait between two status requests for the same job.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Maximum time a job is observed before a timeout error.
    #[serde(with = "duration_secs")]
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_POLL_DEADLINE,
        }
    }
}

impl PollConfig {
    /// Creates a poll configuration with the given interval and deadline.
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

/// Durations are written as whole seconds in configuration files.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
