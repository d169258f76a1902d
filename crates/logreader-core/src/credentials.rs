//! Service-account credentials and OAuth2 access tokens.
//!
//! Storage and model clients both authorize with a bearer token. Tokens are
//! minted by signing a JWT assertion with the service account's private key
//! and exchanging it at the key file's `token_uri`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to read credential file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid credential file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to sign token assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// The subset of a service-account JSON key file we use.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: Option<String>,
    pub project_id: Option<String>,
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("key_type", &self.key_type)
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"***")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Load a service-account key from a JSON file.
pub fn load_service_account(path: &Path) -> Result<ServiceAccountKey, CredentialError> {
    let content = std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Source of bearer tokens for Google APIs.
pub trait TokenProvider: Send + Sync {
    fn access_token<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, CredentialError>> + Send + 'a>>;
}

/// A fixed, externally issued token (e.g. from `gcloud auth print-access-token`).
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn access_token<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, CredentialError>> + Send + 'a>> {
        let token = self.0.clone();
        Box::pin(async move { Ok(token) })
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Mints and caches access tokens for a service account.
///
/// The cache sits behind an async mutex so concurrent requests that find the
/// token expired trigger a single exchange.
pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(key: ServiceAccountKey, client: reqwest::Client) -> Self {
        Self {
            key,
            client,
            cached: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &ServiceAccountKey {
        &self.key
    }

    /// Build the signed JWT assertion for a token exchange at `now_secs`.
    pub fn assertion(&self, now_secs: u64) -> Result<String, CredentialError> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.key.token_uri,
            iat: now_secs,
            exp: now_secs + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(&header, &claims, &signing_key)?)
    }

    async fn exchange(&self) -> Result<CachedToken, CredentialError> {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let assertion = self.assertion(now_secs)?;

        let resp = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = resp.json().await?;
        tracing::debug!(
            client_email = %self.key.client_email,
            expires_in = token.expires_in,
            "obtained access token"
        );
        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}

impl TokenProvider for ServiceAccountTokens {
    fn access_token<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, CredentialError>> + Send + 'a>> {
        Box::pin(async move {
            let mut cached = self.cached.lock().await;
            if let Some(ref token) = *cached {
                if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                    return Ok(token.token.clone());
                }
            }
            let fresh = self.exchange().await?;
            let token = fresh.token.clone();
            *cached = Some(fresh);
            Ok(token)
        })
    }
}
