//! Service-account OAuth2 for the Compute Engine API.
//!
//! Implements the JWT bearer grant: sign a short-lived assertion with the
//! service account key, exchange it for an access token, cache the token until
//! shortly before it expires.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{BotError, BotResult};

const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// Supplies bearer tokens for API requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> BotResult<String>;
}

/// A fixed token, for tests and for tokens minted outside the bot.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> BotResult<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Token source backed by a service account key.
pub struct ServiceAccountTokenSource {
    client: Client,
    client_email: String,
    token_url: String,
    key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(
        client: Client,
        client_email: impl Into<String>,
        token_url: impl Into<String>,
        private_key_pem: &[u8],
    ) -> BotResult<Self> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| BotError::Auth(format!("invalid service account key: {e}")))?;

        Ok(Self {
            client,
            client_email: client_email.into(),
            token_url: token_url.into(),
            key,
            cached: Mutex::new(None),
        })
    }

    /// Read the PEM private key from disk.
    pub fn from_key_file(
        client: Client,
        client_email: impl Into<String>,
        token_url: impl Into<String>,
        path: &Path,
    ) -> BotResult<Self> {
        let pem = std::fs::read(path).map_err(|e| {
            BotError::Configuration(format!(
                "unable to read google private key from {}: {e}",
                path.display()
            ))
        })?;
        Self::new(client, client_email, token_url, &pem)
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> BotResult<String> {
        let claims = Claims {
            iss: &self.client_email,
            scope: COMPUTE_SCOPE,
            aud: &self.token_url,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| BotError::Auth(format!("failed to sign assertion: {e}")))
    }

    async fn exchange(&self, assertion: &str) -> BotResult<TokenResponse> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Auth(format!("token exchange returned {status}: {body}")));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| BotError::Auth(format!("malformed token response: {e}")))
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> BotResult<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if token.expires_at > now {
                return Ok(token.value.clone());
            }
            debug!("Access token expired, refreshing");
        }

        let assertion = self.sign_assertion(now)?;
        let response = self.exchange(&assertion).await?;
        let lifetime = (response.expires_in - REFRESH_MARGIN_SECS).max(0);

        info!(
            client_email = %self.client_email,
            expires_in = response.expires_in,
            "Obtained compute access token"
        );

        let value = response.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: now + Duration::seconds(lifetime),
        });
        Ok(value)
    }
}

impl fmt::Debug for ServiceAccountTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountTokenSource")
            .field("client_email", &self.client_email)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let source = StaticToken("ya29.test".to_string());
        assert_eq!(source.token().await.unwrap(), "ya29.test");
    }

    #[test]
    fn test_rejects_invalid_key() {
        let err = ServiceAccountTokenSource::new(
            Client::new(),
            "bot@example.iam.gserviceaccount.com",
            "https://oauth2.googleapis.com/token",
            b"not a pem key",
        )
        .unwrap_err();
        assert!(matches!(err, BotError::Auth(_)));
    }

    #[test]
    fn test_missing_key_file_is_configuration_error() {
        let err = ServiceAccountTokenSource::from_key_file(
            Client::new(),
            "bot@example.iam.gserviceaccount.com",
            "https://oauth2.googleapis.com/token",
            Path::new("/nonexistent/google-private-key.txt"),
        )
        .unwrap_err();
        assert!(matches!(err, BotError::Configuration(_)));
    }
}
