//! OAuth2 access tokens for Google service accounts
//!
//! Tokens are minted with the JWT-bearer grant: a self-signed RS256 assertion
//! naming the requested scopes is exchanged at the key's token endpoint. The
//! token is cached until shortly before it expires.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CredentialError;

/// Token endpoint used when the key JSON does not name one
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Full access to Compute Engine
pub const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";

/// Full control over Cloud Storage (attached to provisioned instances)
pub const DEVSTORAGE_FULL_CONTROL_SCOPE: &str =
    "https://www.googleapis.com/auth/devstorage.full_control";

/// Cloud SQL administration
pub const SQL_ADMIN_SCOPE: &str = "https://www.googleapis.com/auth/sqlservice.admin";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each assertion, the maximum Google accepts
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh this long before the cached token expires
const EXPIRY_SKEW_SECS: i64 = 60;

/// The parts of a service-account key JSON needed to mint tokens
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Service account email, used as the assertion issuer
    pub client_email: String,
    /// PEM-encoded RSA private key
    pub private_key: String,
    /// Token endpoint
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// Project the service account belongs to, if present
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Parse a key file as downloaded from the Google Cloud console
    pub fn from_json(json: &[u8]) -> Result<Self, CredentialError> {
        let key: ServiceAccountKey =
            serde_json::from_slice(json).map_err(|e| CredentialError::MalformedKey(e.to_string()))?;
        if key.client_email.is_empty() {
            return Err(CredentialError::MalformedKey("client_email is empty".to_string()));
        }
        if key.private_key.trim().is_empty() {
            return Err(CredentialError::MalformedKey("private_key is empty".to_string()));
        }
        Ok(key)
    }
}

/// Source of bearer tokens for API requests
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// A currently valid access token
    async fn access_token(&self) -> Result<String, CredentialError>;
}

/// Fixed token, for tests and for tokens obtained out of band
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, CredentialError> {
        Ok(self.0.clone())
    }
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Mints and caches tokens for one service account and scope set
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scopes: Vec<String>,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    /// Token source for `scopes`; fails if the private key is unusable
    pub fn new(
        key: ServiceAccountKey,
        scopes: &[&str],
        http: reqwest::Client,
    ) -> Result<Self, CredentialError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            CredentialError::InvalidKey {
                client_email: key.client_email.clone(),
                message: e.to_string(),
            }
        })?;
        Ok(Self {
            key,
            encoding_key,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            http,
            cached: Mutex::new(None),
        })
    }

    /// Shareable token source
    pub fn shared(
        key: ServiceAccountKey,
        scopes: &[&str],
        http: reqwest::Client,
    ) -> Result<Arc<dyn AccessTokenProvider>, CredentialError> {
        Ok(Arc::new(Self::new(key, scopes, http)?))
    }

    fn assertion(&self, now: i64) -> Result<String, CredentialError> {
        #[derive(Serialize)]
        struct Claims<'a> {
            iss: &'a str,
            scope: String,
            aud: &'a str,
            iat: i64,
            exp: i64,
        }

        let claims = Claims {
            iss: &self.key.client_email,
            scope: self.scopes.join(" "),
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key).map_err(
            |e| CredentialError::InvalidKey {
                client_email: self.key.client_email.clone(),
                message: e.to_string(),
            },
        )
    }

    async fn exchange(&self, now: i64) -> Result<CachedToken, CredentialError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            expires_in: Option<i64>,
        }

        let assertion = self.assertion(now)?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| CredentialError::TokenExchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenExchange(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::TokenExchange(e.to_string()))?;
        let lifetime = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);

        debug!(
            client_email = %self.key.client_email,
            expires_in = lifetime,
            "minted access token"
        );
        Ok(CachedToken {
            token: token.access_token,
            expires_at: now + lifetime,
        })
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, CredentialError> {
        let mut cached = self.cached.lock().await;
        let now = chrono::Utc::now().timestamp();
        if let Some(token) = cached.as_ref() {
            if now < token.expires_at - EXPIRY_SKEW_SECS {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.exchange(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}
