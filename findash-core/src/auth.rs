//! Bearer tokens for the cloud APIs.
//!
//! Two sources: a pre-issued token from the environment, or a service
//! account key file exchanged for an access token through the OAuth2
//! JWT-bearer grant. Exchanged tokens are cached until shortly before expiry.

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// A cached token is refreshed once it has less than this left.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("cannot read service account key {path}: {reason}")]
    KeyFile { path: String, reason: String },

    #[error("cannot sign token assertion: {0}")]
    Signing(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),
}

pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<String, AuthError>;
}

/// A token obtained out of band (`GCP_ACCESS_TOKEN`).
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// Fields of a service account JSON key that the grant needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub token_uri: String,
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

struct CachedToken {
    value: String,
    expires_at: i64,
}

pub struct ServiceAccount {
    key: ServiceAccountKey,
    client: reqwest::blocking::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccount {
    pub fn new(key: ServiceAccountKey) -> Result<Self, AuthError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Exchange(e.to_string()))?;
        Ok(Self {
            key,
            client,
            cache: Mutex::new(None),
        })
    }

    pub fn from_key_file(path: &Path) -> Result<Self, AuthError> {
        let key_file_err = |reason: String| AuthError::KeyFile {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| key_file_err(e.to_string()))?;
        let key: ServiceAccountKey =
            serde_json::from_str(&text).map_err(|e| key_file_err(e.to_string()))?;
        Self::new(key)
    }

    fn assertion(&self, now: i64) -> Result<String, AuthError> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    fn exchange(&self, now: i64) -> Result<CachedToken, AuthError> {
        let assertion = self.assertion(now)?;
        debug!(token_uri = %self.key.token_uri, "exchanging service account assertion");

        let resp = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(AuthError::Exchange(format!("HTTP {status}: {body}")));
        }

        let token: TokenResponse = resp
            .json()
            .map_err(|e| AuthError::Exchange(format!("token response: {e}")))?;
        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + token.expires_in,
        })
    }
}

impl TokenSource for ServiceAccount {
    fn token(&self) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| AuthError::Exchange("token cache poisoned".into()))?;

        if let Some(cached) = cache.as_ref() {
            if cached.expires_at - EXPIRY_MARGIN_SECS > now {
                return Ok(cached.value.clone());
            }
        }

        let fresh = self.exchange(now)?;
        let value = fresh.value.clone();
        *cache = Some(fresh);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const TEST_KEY: &str = include_str!("../tests/fixtures/test_service_account.pem");

    fn key(token_uri: String) -> ServiceAccountKey {
        ServiceAccountKey {
            client_email: "loader@proj.iam.gserviceaccount.com".into(),
            private_key: TEST_KEY.into(),
            token_uri,
        }
    }

    #[test]
    fn static_token_is_returned_verbatim() {
        assert_eq!(StaticToken::new("abc").token().unwrap(), "abc");
    }

    #[test]
    fn exchanged_token_is_cached() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::Regex("grant_type=urn".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.test","expires_in":3600,"token_type":"Bearer"}"#)
            .expect(1)
            .create();

        let account = ServiceAccount::new(key(format!("{}/token", server.url()))).unwrap();
        assert_eq!(account.token().unwrap(), "ya29.test");
        assert_eq!(account.token().unwrap(), "ya29.test");
        mock.assert();
    }

    #[test]
    fn short_lived_token_is_refreshed() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"short","expires_in":10}"#)
            .expect(2)
            .create();

        let account = ServiceAccount::new(key(format!("{}/token", server.url()))).unwrap();
        account.token().unwrap();
        account.token().unwrap();
        mock.assert();
    }

    #[test]
    fn rejected_grant_is_exchange_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create();

        let account = ServiceAccount::new(key(format!("{}/token", server.url()))).unwrap();
        let err = account.token().unwrap_err();
        assert!(matches!(err, AuthError::Exchange(msg) if msg.contains("invalid_grant")));
    }

    #[test]
    fn bad_private_key_is_signing_error() {
        let mut bad = key("http://127.0.0.1:1/token".into());
        bad.private_key = "not a pem".into();
        let err = ServiceAccount::new(bad).unwrap().token().unwrap_err();
        assert!(matches!(err, AuthError::Signing(_)));
    }

    #[test]
    fn missing_key_file_names_the_path() {
        let err = ServiceAccount::from_key_file(Path::new("/nonexistent/key.json"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("/nonexistent/key.json"));
    }
}
