//! Token endpoint exchange for Salesforce OAuth.
//!
//! Every grant flow ends in the same form-encoded POST to
//! `/services/oauth2/token`; only the parameters differ. Refresh replays the
//! grant that produced the current credential.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, info};

use crate::error::{Error, RemoteError};

/// Path of the OAuth token endpoint, relative to the login URL.
pub const TOKEN_PATH: &str = "/services/oauth2/token";

/// Grant type URN for the JWT bearer flow.
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response from the token endpoint.
#[derive(Debug, Deserialize)]
pub struct AccessTokenResponse {
    /// The new access token.
    pub access_token: String,
    /// The instance URL (may change due to org migrations).
    pub instance_url: String,
    /// Token type (usually "Bearer").
    #[serde(default)]
    pub token_type: String,
    /// Issued at timestamp.
    #[serde(default)]
    pub issued_at: String,
}

/// OAuth error body returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Parameters for one token request.
pub enum TokenGrant<'a> {
    /// Username-password flow. `password` includes the security token suffix
    /// when the org requires one.
    Password {
        client_id: &'a str,
        client_secret: &'a SecretString,
        username: &'a str,
        password: &'a SecretString,
    },
    /// Client credentials flow.
    ClientCredentials {
        client_id: &'a str,
        client_secret: &'a SecretString,
    },
    /// JWT bearer flow with a signed assertion.
    JwtBearer { assertion: &'a SecretString },
}

impl TokenGrant<'_> {
    fn name(&self) -> &'static str {
        match self {
            TokenGrant::Password { .. } => "password",
            TokenGrant::ClientCredentials { .. } => "client_credentials",
            TokenGrant::JwtBearer { .. } => "jwt_bearer",
        }
    }

    fn form(&self) -> Vec<(&'static str, &str)> {
        match self {
            TokenGrant::Password {
                client_id,
                client_secret,
                username,
                password,
            } => vec![
                ("grant_type", "password"),
                ("client_id", client_id),
                ("client_secret", client_secret.expose_secret()),
                ("username", username),
                ("password", password.expose_secret()),
            ],
            TokenGrant::ClientCredentials {
                client_id,
                client_secret,
            } => vec![
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret.expose_secret()),
            ],
            TokenGrant::JwtBearer { assertion } => vec![
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.expose_secret()),
            ],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Request
// ─────────────────────────────────────────────────────────────────────────────

/// Exchanges a grant for an access token.
///
/// # Errors
///
/// - `Error::SessionExpired` - The grant was rejected (400/401)
/// - `Error::ConnectionFailed` - Network error
/// - `Error::Salesforce` - Any other non-2xx answer
///
/// # Security
///
/// Never logs the grant parameters or the returned token.
pub async fn request_token(
    http: &reqwest::Client,
    login_url: &str,
    grant: &TokenGrant<'_>,
) -> Result<AccessTokenResponse, Error> {
    let token_url = format!("{}{}", login_url.trim_end_matches('/'), TOKEN_PATH);

    info!("[SFDC] Requesting access token ({} grant)", grant.name());

    let response = http
        .post(&token_url)
        .form(&grant.form())
        .send()
        .await
        .map_err(|_| {
            error!("[SFDC] Token request failed");
            Error::ConnectionFailed("Failed to connect to the token endpoint".to_string())
        })?;

    let status = response.status();

    if status.is_success() {
        let token_response: AccessTokenResponse = response.json().await.map_err(|_| {
            error!("[SFDC] Failed to parse token response");
            Error::UnexpectedResponse("Invalid token response".to_string())
        })?;

        info!("[SFDC] Access token issued");
        return Ok(token_response);
    }

    let body = response.text().await.unwrap_or_default();
    let oauth_error = serde_json::from_str::<OAuthErrorBody>(&body).ok();

    if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED {
        error!(
            "[SFDC] Token request rejected: {} {}",
            status.as_u16(),
            oauth_error.as_ref().map(|e| e.error.as_str()).unwrap_or("-")
        );
        return Err(Error::SessionExpired);
    }

    error!("[SFDC] Token request failed with status: {}", status);
    let (code, message) = match oauth_error {
        Some(e) => (e.error, e.error_description),
        None => (
            format!("HTTP_{}", status.as_u16()),
            status.canonical_reason().unwrap_or("Unknown error").to_string(),
        ),
    };
    Err(Error::Salesforce(RemoteError {
        status: status.as_u16(),
        code,
        message,
        fields: Vec::new(),
        raw: String::new(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
