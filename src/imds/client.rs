//! # Instance-metadata service client.
//!
//! [`Imds`] is the async seam the engine talks through: a single
//! `get_property` returning the body and HTTP status of a metadata lookup.
//! [`HttpImds`] is the production implementation speaking the IMDSv2
//! token-gated protocol; tests substitute mocks.
//!
//! ## Token lifecycle
//! ```text
//! get_property(endpoint)
//!     │ no cached token?
//!     ├──► PUT <base>/api/token  (TTL header, 21600 s)
//!     │       non-200 → error for THIS attempt only
//!     │       200     → cache token
//!     └──► GET <base>/<endpoint> with token header
//!             → (body, status)
//! ```
//! Token acquisition is lazy: nothing is fetched until the first property
//! lookup needs it, and the cached token is reused for every later call.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Default base URL of the metadata service.
pub const IMDS_BASE: &str = "http://169.254.169.254/latest/";

/// Relative endpoint yielding the instance identifier.
pub const INSTANCE_ID_ENDPOINT: &str = "meta-data/instance-id";

const TOKEN_ENDPOINT: &str = "api/token";
const TOKEN_TTL_SECONDS: u64 = 21_600;
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Errors produced by metadata lookups.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ImdsError {
    /// The request never completed (connection refused, timeout, ...).
    #[error("imds request to '{endpoint}' failed: {reason}")]
    Transport {
        /// Relative endpoint of the failed request.
        endpoint: String,
        /// Transport-level failure description.
        reason: String,
    },

    /// The token endpoint answered with a non-200 status.
    #[error("imds token request returned status {status}")]
    TokenRefused {
        /// HTTP status returned by the token PUT.
        status: u16,
    },

    /// A property lookup returned a status the caller treats as an error.
    ///
    /// Raised by *callers* that reject statuses such as 500; the client
    /// itself reports every status verbatim.
    #[error("unexpected status {status} from imds endpoint '{endpoint}'")]
    UnexpectedStatus {
        /// Relative endpoint of the request.
        endpoint: String,
        /// The offending HTTP status.
        status: u16,
    },
}

impl ImdsError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ImdsError::Transport { .. } => "imds_transport",
            ImdsError::TokenRefused { .. } => "imds_token_refused",
            ImdsError::UnexpectedStatus { .. } => "imds_unexpected_status",
        }
    }
}

/// # Token-gated key/value lookups against the metadata service.
///
/// Implementations own the token lifecycle; callers see only properties and
/// statuses. Status interpretation is the caller's concern: 200 is success,
/// 404 is a valid "absent" for user data and public keys.
#[async_trait]
pub trait Imds: Send + Sync + 'static {
    /// Fetches a property, returning the response body and HTTP status.
    async fn get_property(&self, endpoint: &str) -> Result<(String, u16), ImdsError>;
}

/// Production IMDSv2 client.
///
/// Caches the session token behind a mutex; concurrent property fetches
/// share a single token acquisition.
pub struct HttpImds {
    base: String,
    http: reqwest::Client,
    token: Mutex<Option<String>>,
}

impl HttpImds {
    /// Creates a client against the conventional metadata endpoint.
    pub fn new() -> Self {
        Self::with_base(IMDS_BASE)
    }

    /// Creates a client against an alternate base URL (tests, proxies).
    pub fn with_base(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            http: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    /// Ensures a cached session token, requesting one if absent.
    ///
    /// A non-200 answer fails this attempt without poisoning the cache; the
    /// next property fetch retries the PUT.
    async fn ensure_token(&self) -> Result<String, ImdsError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }

        let url = format!("{}{}", self.base, TOKEN_ENDPOINT);
        let resp = self
            .http
            .put(&url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)
            .send()
            .await
            .map_err(|e| ImdsError::Transport {
                endpoint: TOKEN_ENDPOINT.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(ImdsError::TokenRefused { status });
        }

        let token = resp.text().await.map_err(|e| ImdsError::Transport {
            endpoint: TOKEN_ENDPOINT.into(),
            reason: e.to_string(),
        })?;
        *slot = Some(token.clone());
        Ok(token)
    }
}

impl Default for HttpImds {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Imds for HttpImds {
    async fn get_property(&self, endpoint: &str) -> Result<(String, u16), ImdsError> {
        let token = self.ensure_token().await?;

        let url = format!("{}{}", self.base, endpoint);
        let resp = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| ImdsError::Transport {
                endpoint: endpoint.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| ImdsError::Transport {
            endpoint: endpoint.into(),
            reason: e.to_string(),
        })?;

        Ok((body, status))
    }
}
