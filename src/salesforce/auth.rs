//! Credential supply and refresh for Salesforce API access.
//!
//! The [`Authenticator`] trait is the only place a bearer credential comes
//! from. [`OAuthAuthenticator`] implements it for the password, client
//! credentials, JWT bearer and pre-issued token flows, and refreshes by
//! replaying whichever flow produced the current credential.
//!
//! # Concurrency
//!
//! The credential sits behind a `RwLock`. Requests take a short read lock to
//! copy it; `refresh()` takes the write lock only to swap in the new value and
//! never holds it across the token request. Concurrent refreshes are not
//! deduplicated.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{CLIENT_USER_AGENT, DEFAULT_TIMEOUT_SECS};
use crate::error::Error;
use crate::salesforce::refresh::{self, TokenGrant};

/// Lifetime requested for JWT bearer assertions.
const JWT_ASSERTION_LIFETIME_SECS: u64 = 180;

// ─────────────────────────────────────────────────────────────────────────────
// LoginType
// ─────────────────────────────────────────────────────────────────────────────

/// Specifies the Salesforce login environment.
#[derive(Debug, Clone)]
pub enum LoginType {
    /// Production environment (login.salesforce.com)
    Production,
    /// Sandbox environment (test.salesforce.com)
    Sandbox,
    /// Custom domain (e.g., my-domain.my.salesforce.com)
    Custom(String),
}

impl LoginType {
    /// Returns the login domain for this login type.
    pub fn domain(&self) -> &str {
        match self {
            LoginType::Production => "login.salesforce.com",
            LoginType::Sandbox => "test.salesforce.com",
            LoginType::Custom(domain) => domain,
        }
    }

    /// Returns the login URL (scheme and host) for this login type.
    pub fn login_url(&self) -> String {
        format!("https://{}", self.domain())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Credential
// ─────────────────────────────────────────────────────────────────────────────

/// A bearer token together with the instance it is valid for.
#[derive(Clone)]
pub struct Credential {
    /// OAuth access token (wrapped for security)
    pub access_token: SecretString,
    /// Instance URL (e.g., "https://na1.salesforce.com")
    pub instance_url: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("instance_url", &self.instance_url)
            .finish()
    }
}

impl From<refresh::AccessTokenResponse> for Credential {
    fn from(response: refresh::AccessTokenResponse) -> Self {
        Self {
            access_token: SecretString::from(response.access_token),
            instance_url: response.instance_url,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GrantFlow
// ─────────────────────────────────────────────────────────────────────────────

/// The grant flow that produced the current credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantFlow {
    /// Username-password flow.
    Password,
    /// Client credentials flow.
    ClientCredentials,
    /// JWT bearer flow.
    JwtBearer,
    /// Caller-supplied access token; cannot be refreshed.
    PreIssuedToken,
}

// ─────────────────────────────────────────────────────────────────────────────
// JwtSigner
// ─────────────────────────────────────────────────────────────────────────────

/// Claims of a JWT bearer assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JwtClaims {
    /// Connected app consumer key.
    pub iss: String,
    /// Username the token is issued for.
    pub sub: String,
    /// Login URL the assertion is presented to.
    pub aud: String,
    /// Expiry as seconds since the Unix epoch.
    pub exp: u64,
}

/// Signs JWT bearer assertions. The signing key never enters this crate.
pub trait JwtSigner: Send + Sync {
    /// Returns the compact serialized, signed assertion for `claims`.
    fn sign(&self, claims: &JwtClaims) -> Result<SecretString, Error>;
}

// ─────────────────────────────────────────────────────────────────────────────
// AuthConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Credential material for [`OAuthAuthenticator`]. The grant flow is chosen
/// from which fields are present; see [`AuthConfig::grant_flow`].
#[derive(Clone)]
pub struct AuthConfig {
    /// Login URL the token endpoint lives under.
    pub login_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub username: Option<String>,
    /// Password with the security token appended, if the org needs one.
    pub password: Option<SecretString>,
    pub access_token: Option<SecretString>,
    pub instance_url: Option<String>,
    pub jwt_signer: Option<Arc<dyn JwtSigner>>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |present: bool| present.then_some("[REDACTED]");
        f.debug_struct("AuthConfig")
            .field("login_url", &self.login_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(self.client_secret.is_some()))
            .field("username", &self.username)
            .field("password", &redacted(self.password.is_some()))
            .field("access_token", &redacted(self.access_token.is_some()))
            .field("instance_url", &self.instance_url)
            .field("jwt_signer", &self.jwt_signer.is_some())
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::for_login(LoginType::Production)
    }
}

impl AuthConfig {
    /// Creates an empty configuration for the given login environment.
    pub fn for_login(login_type: LoginType) -> Self {
        Self {
            login_url: login_type.login_url(),
            client_id: None,
            client_secret: None,
            username: None,
            password: None,
            access_token: None,
            instance_url: None,
            jwt_signer: None,
        }
    }

    /// Overrides the login URL (custom domains, tests).
    pub fn with_login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = login_url.into();
        self
    }

    /// Sets the connected app consumer key and secret.
    pub fn with_client(mut self, client_id: impl Into<String>, client_secret: SecretString) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret);
        self
    }

    /// Sets the connected app consumer key only (JWT bearer flow).
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets username and password for the password flow.
    pub fn with_password(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.username = Some(username.into());
        self.password = Some(password);
        self
    }

    /// Sets the username and signer for the JWT bearer flow.
    pub fn with_jwt(mut self, username: impl Into<String>, signer: Arc<dyn JwtSigner>) -> Self {
        self.username = Some(username.into());
        self.jwt_signer = Some(signer);
        self
    }

    /// Uses an access token obtained elsewhere.
    pub fn with_access_token(mut self, instance_url: impl Into<String>, token: SecretString) -> Self {
        self.instance_url = Some(instance_url.into());
        self.access_token = Some(token);
        self
    }

    /// Selects the grant flow from the supplied fields.
    ///
    /// Precedence: pre-issued token, password, JWT bearer, client credentials.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when no flow's required fields are complete.
    pub fn grant_flow(&self) -> Result<GrantFlow, Error> {
        let has_client = self.client_id.is_some();
        let has_secret = self.client_secret.is_some();

        if self.access_token.is_some() {
            if self.instance_url.as_deref().map_or(true, str::is_empty) {
                return Err(Error::Config(
                    "an access token needs an instance URL".to_string(),
                ));
            }
            return Ok(GrantFlow::PreIssuedToken);
        }
        if self.username.is_some() && self.password.is_some() && has_client && has_secret {
            return Ok(GrantFlow::Password);
        }
        if self.username.is_some() && self.jwt_signer.is_some() && has_client {
            return Ok(GrantFlow::JwtBearer);
        }
        if has_client && has_secret {
            return Ok(GrantFlow::ClientCredentials);
        }

        Err(Error::Config(
            "no complete credential set: supply an access token, username/password with \
             client id/secret, a JWT signer with client id and username, or client id/secret"
                .to_string(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authenticator
// ─────────────────────────────────────────────────────────────────────────────

/// Supplies the bearer credential for every request and refreshes it.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns a copy of the current credential.
    async fn current_credential(&self) -> Result<Credential, Error>;

    /// Replaces the held credential with a freshly issued one.
    async fn refresh(&self) -> Result<(), Error>;

    /// The grant flow refresh replays.
    fn grant_flow(&self) -> GrantFlow;
}

// ─────────────────────────────────────────────────────────────────────────────
// OAuthAuthenticator
// ─────────────────────────────────────────────────────────────────────────────

/// OAuth 2.0 authenticator for the Salesforce token endpoint.
pub struct OAuthAuthenticator {
    http: reqwest::Client,
    config: AuthConfig,
    flow: GrantFlow,
    credential: RwLock<Option<Credential>>,
}

impl fmt::Debug for OAuthAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthAuthenticator")
            .field("config", &self.config)
            .field("flow", &self.flow)
            .finish()
    }
}

impl OAuthAuthenticator {
    /// Creates an authenticator without contacting Salesforce.
    ///
    /// A pre-issued token is usable immediately; other flows need
    /// [`authenticate`](Self::authenticate) (or a first `refresh`).
    pub fn new(config: AuthConfig) -> Result<Self, Error> {
        let flow = config.grant_flow()?;

        let credential = match flow {
            GrantFlow::PreIssuedToken => match (&config.access_token, &config.instance_url) {
                (Some(token), Some(instance_url)) => Some(Credential {
                    access_token: token.clone(),
                    instance_url: instance_url.clone(),
                }),
                _ => None,
            },
            _ => None,
        };

        Ok(Self {
            http: build_http_client()?,
            config,
            flow,
            credential: RwLock::new(credential),
        })
    }

    /// Creates an authenticator and performs the initial grant.
    pub async fn connect(config: AuthConfig) -> Result<Self, Error> {
        let auth = Self::new(config)?;
        auth.authenticate().await?;
        Ok(auth)
    }

    /// Shorthand for a pre-issued token.
    pub fn with_token(instance_url: impl Into<String>, token: SecretString) -> Result<Self, Error> {
        Self::new(AuthConfig::default().with_access_token(instance_url, token))
    }

    /// Obtains the first credential. A no-op for pre-issued tokens.
    pub async fn authenticate(&self) -> Result<(), Error> {
        if self.flow == GrantFlow::PreIssuedToken {
            return Ok(());
        }
        self.refresh().await
    }

    /// Runs the configured grant against the token endpoint.
    async fn request_credential(&self) -> Result<Credential, Error> {
        let missing = |field: &str| Error::Config(format!("missing {}", field));
        let client_id = || self.config.client_id.as_deref().ok_or_else(|| missing("client id"));
        let client_secret = || {
            self.config
                .client_secret
                .as_ref()
                .ok_or_else(|| missing("client secret"))
        };
        let username = || self.config.username.as_deref().ok_or_else(|| missing("username"));

        let response = match self.flow {
            GrantFlow::Password => {
                let password = self.config.password.as_ref().ok_or_else(|| missing("password"))?;
                let grant = TokenGrant::Password {
                    client_id: client_id()?,
                    client_secret: client_secret()?,
                    username: username()?,
                    password,
                };
                refresh::request_token(&self.http, &self.config.login_url, &grant).await?
            }
            GrantFlow::ClientCredentials => {
                let grant = TokenGrant::ClientCredentials {
                    client_id: client_id()?,
                    client_secret: client_secret()?,
                };
                refresh::request_token(&self.http, &self.config.login_url, &grant).await?
            }
            GrantFlow::JwtBearer => {
                let signer = self.config.jwt_signer.as_ref().ok_or_else(|| missing("JWT signer"))?;
                let claims = JwtClaims {
                    iss: client_id()?.to_string(),
                    sub: username()?.to_string(),
                    aud: self.config.login_url.clone(),
                    exp: unix_now().saturating_add(JWT_ASSERTION_LIFETIME_SECS),
                };
                let assertion = signer.sign(&claims)?;
                let grant = TokenGrant::JwtBearer {
                    assertion: &assertion,
                };
                refresh::request_token(&self.http, &self.config.login_url, &grant).await?
            }
            GrantFlow::PreIssuedToken => {
                warn!("[SFDC] Pre-issued access token cannot be refreshed");
                return Err(Error::SessionExpired);
            }
        };

        Ok(Credential::from(response))
    }
}

#[async_trait]
impl Authenticator for OAuthAuthenticator {
    async fn current_credential(&self) -> Result<Credential, Error> {
        self.credential
            .read()
            .await
            .clone()
            .ok_or(Error::NotAuthenticated)
    }

    async fn refresh(&self) -> Result<(), Error> {
        let credential = self.request_credential().await?;

        *self.credential.write().await = Some(credential);

        info!("[SFDC] Credential refreshed ({:?} flow)", self.flow);
        Ok(())
    }

    fn grant_flow(&self) -> GrantFlow {
        self.flow
    }
}

/// Builds the HTTP client used for token requests.
fn build_http_client() -> Result<reqwest::Client, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
