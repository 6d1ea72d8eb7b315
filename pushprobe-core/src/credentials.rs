//! Credential exchange for the push gateway.
//!
//! A service-account private key is turned into a short-lived bearer token
//! by signing an RS256 assertion and trading it at the OAuth2 token endpoint
//! (JWT-bearer grant). Tokens are cached in a single slot keyed by the
//! service-account identity and refreshed once they get within
//! `refresh_margin` of expiry. The slot's lock is held across the refresh,
//! so concurrent dispatches never sign twice for the same stale token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{PushProbeError, Result};

pub const FCM_MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
const MAX_TOKEN_LIFETIME_SECS: i64 = 86_400;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct RawServiceAccount {
    #[serde(default, rename = "type")]
    account_type: String,
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    private_key_id: String,
    #[serde(default)]
    private_key: String,
    #[serde(default)]
    client_email: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

/// The fields of a service-account JSON key that the exchange needs.
#[derive(Debug)]
pub struct ServiceAccountCredentials {
    pub account_type: String,
    pub project_id: String,
    pub private_key_id: String,
    pub private_key: SecretString,
    pub client_email: String,
    pub token_uri: String,
}

impl ServiceAccountCredentials {
    /// Parse and validate a service-account JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let raw: RawServiceAccount = serde_json::from_str(raw).map_err(|e| {
            PushProbeError::Credential(format!("invalid service account JSON: {}", e))
        })?;

        if raw.project_id.is_empty()
            || raw.client_email.is_empty()
            || raw.private_key.trim().is_empty()
        {
            return Err(PushProbeError::Credential(
                "service account is missing project_id, client_email or private_key".to_string(),
            ));
        }

        Ok(Self {
            account_type: raw.account_type,
            project_id: raw.project_id,
            private_key_id: raw.private_key_id,
            private_key: SecretString::from(raw.private_key),
            client_email: raw.client_email,
            token_uri: raw.token_uri,
        })
    }

    /// Cache key: which key of which account signed the assertion.
    pub fn identity(&self) -> String {
        format!("{}#{}", self.client_email, self.private_key_id)
    }
}

/// A bearer token for the push gateway.
pub struct DelegatedToken {
    access_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl DelegatedToken {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            expires_at,
        }
    }

    pub fn expose(&self) -> &str {
        self.access_token.expose_secret()
    }

    /// Usable for at least `margin` more.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        now + margin < self.expires_at
    }
}

impl Clone for DelegatedToken {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_string(), self.expires_at)
    }
}

impl std::fmt::Debug for DelegatedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatedToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub scope: String,
    pub timeout: Duration,
    pub refresh_margin: Duration,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            scope: FCM_MESSAGING_SCOPE.to_string(),
            timeout: Duration::from_secs(30),
            refresh_margin: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    identity: String,
    token: DelegatedToken,
}

/// Obtains delegated tokens, reusing a cached one while it is fresh.
pub struct CredentialProvider {
    client: reqwest::Client,
    config: CredentialConfig,
    cache: Mutex<Option<CachedToken>>,
}

impl CredentialProvider {
    pub fn new(config: CredentialConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PushProbeError::Credential(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            cache: Mutex::new(None),
        })
    }

    /// Cached entry point used by the dispatcher.
    pub async fn token_for(&self, creds: &ServiceAccountCredentials) -> Result<DelegatedToken> {
        let identity = creds.identity();
        let mut slot = self.cache.lock().await;

        if let Some(cached) = slot.as_ref() {
            if cached.identity == identity
                && cached.token.is_fresh(Utc::now(), self.config.refresh_margin)
            {
                debug!(identity = %identity, "reusing cached delegated token");
                return Ok(cached.token.clone());
            }
        }

        let token = self.exchange(creds).await?;
        *slot = Some(CachedToken {
            identity,
            token: token.clone(),
        });
        Ok(token)
    }

    /// Drop the cached token, e.g. after the gateway rejected it.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// One uncached assertion-for-token round trip.
    pub async fn exchange(&self, creds: &ServiceAccountCredentials) -> Result<DelegatedToken> {
        let now = Utc::now();
        let assertion = self.sign_assertion(creds, now.timestamp())?;

        let response = self
            .client
            .post(&creds.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| PushProbeError::upstream(None, format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read token response body".to_string());
            return Err(PushProbeError::upstream(
                Some(status.as_u16()),
                format!("token endpoint rejected assertion: {}", body),
            ));
        }

        let payload: TokenEndpointResponse = response.json().await.map_err(|e| {
            PushProbeError::upstream(
                Some(status.as_u16()),
                format!("unparsable token response: {}", e),
            )
        })?;

        if payload.access_token.is_empty() {
            return Err(PushProbeError::upstream(
                Some(status.as_u16()),
                "token response carried an empty access_token",
            ));
        }

        let lifetime = payload.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        if lifetime <= 0 {
            return Err(PushProbeError::upstream(
                Some(status.as_u16()),
                format!("token response carried a non-positive expires_in: {}", lifetime),
            ));
        }
        let expires_at = chrono::Duration::try_seconds(lifetime.min(MAX_TOKEN_LIFETIME_SECS))
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                PushProbeError::upstream(
                    Some(status.as_u16()),
                    format!("token response carried an unusable expires_in: {}", lifetime),
                )
            })?;

        info!(
            client_email = %creds.client_email,
            token_type = payload.token_type.as_deref().unwrap_or("Bearer"),
            %expires_at,
            "obtained delegated token"
        );

        Ok(DelegatedToken::new(payload.access_token, expires_at))
    }

    fn sign_assertion(&self, creds: &ServiceAccountCredentials, now: i64) -> Result<String> {
        let key = EncodingKey::from_rsa_pem(creds.private_key.expose_secret().as_bytes())
            .map_err(|e| PushProbeError::Credential(format!("unusable RSA private key: {}", e)))?;

        let mut header = Header::new(Algorithm::RS256);
        if !creds.private_key_id.is_empty() {
            header.kid = Some(creds.private_key_id.clone());
        }

        let claims = AssertionClaims {
            iss: &creds.client_email,
            scope: &self.config.scope,
            aud: &creds.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| PushProbeError::Credential(format!("failed to sign assertion: {}", e)))
    }
}
