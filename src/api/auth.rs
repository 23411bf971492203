//! OAuth 1.0a request signing and credential sources

use crate::api::{ApiError, ApiResult};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::fmt;
use std::path::PathBuf;

type HmacSha1 = Hmac<Sha1>;

/// The four OAuth secrets
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token_key: String,
    pub access_token_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("access_token_key", &self.access_token_key)
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Names of the secrets that are empty
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("consumer_key", &self.consumer_key),
            ("consumer_secret", &self.consumer_secret),
            ("access_token_key", &self.access_token_key),
            ("access_token_secret", &self.access_token_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Where credentials come from; consulted again on every refresh
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    async fn load(&self) -> ApiResult<Credentials>;
}

#[async_trait::async_trait]
impl CredentialSource for Credentials {
    async fn load(&self) -> ApiResult<Credentials> {
        Ok(self.clone())
    }
}

/// Secrets file that is re-read on refresh, so rotated secrets are picked up
#[derive(Debug, Clone)]
pub struct CredentialsFile {
    path: PathBuf,
}

impl CredentialsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl CredentialSource for CredentialsFile {
    async fn load(&self) -> ApiResult<Credentials> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ApiError::Auth(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| ApiError::Auth(format!("Failed to parse {}: {e}", self.path.display())))
    }
}

/// Signs requests with HMAC-SHA1
#[derive(Debug, Clone)]
pub struct OAuthSigner {
    credentials: Credentials,
}

impl OAuthSigner {
    /// Create a signer, rejecting incomplete credentials
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Auth` if any secret is empty.
    pub fn new(credentials: Credentials) -> ApiResult<Self> {
        let missing = credentials.missing();
        if !missing.is_empty() {
            return Err(ApiError::Auth(format!(
                "Missing credentials: {}",
                missing.join(", ")
            )));
        }
        Ok(Self { credentials })
    }

    /// `Authorization` header value for a request
    ///
    /// `url` must not carry a query string; its parameters go in `params`.
    pub fn authorization(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
    ) -> ApiResult<String> {
        let nonce: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        self.authorization_with(method, url, params, &nonce, Utc::now().timestamp())
    }

    fn authorization_with(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        nonce: &str,
        timestamp: i64,
    ) -> ApiResult<String> {
        let timestamp = timestamp.to_string();
        let mut oauth_params = vec![
            ("oauth_consumer_key", self.credentials.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_token", self.credentials.access_token_key.as_str()),
            ("oauth_version", "1.0"),
        ];

        let signature = self.signature(method, url, params, &oauth_params)?;
        oauth_params.push(("oauth_signature", signature.as_str()));
        oauth_params.sort_by(|a, b| a.0.cmp(b.0));

        let fields = oauth_params
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", encode(key), encode(value)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {fields}"))
    }

    fn signature(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        oauth_params: &[(&str, &str)],
    ) -> ApiResult<String> {
        let mut encoded: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (encode(k), encode(v)))
            .chain(oauth_params.iter().map(|(k, v)| (encode(k), encode(v))))
            .collect();
        encoded.sort();

        let parameter_string = encoded
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let base = format!(
            "{}&{}&{}",
            method.to_ascii_uppercase(),
            encode(url),
            encode(&parameter_string)
        );
        let key = format!(
            "{}&{}",
            encode(&self.credentials.consumer_secret),
            encode(&self.credentials.access_token_secret)
        );

        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| ApiError::Auth(format!("Invalid signing key: {e}")))?;
        mac.update(base.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

/// RFC 3986 percent-encoding: everything but unreserved characters
fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
