//! Resilient access to the external REST API
//!
//! [`ApiClient`] signs every request, refreshes rejected credentials, waits
//! out rate limits, retries transient failures with linear backoff, and walks
//! cursor-paginated listings through [`Paginator`].

mod auth;
mod client;
mod clock;
mod error;
mod pagination;
mod rate_limit;
mod transport;

pub use auth::{CredentialSource, Credentials, CredentialsFile, OAuthSigner};
pub use client::{
    ApiClient, ApiRequest, ClientSettings, DEFAULT_BASE_URL, Fetched, RATE_LIMIT_STATUS_ENDPOINT,
    RateLimitPolicy,
};
pub use clock::{Clock, SystemClock};
pub use error::{ApiError, ApiResult, RequestDiagnostics};
pub use pagination::{FIRST_CURSOR, LAST_CURSOR, Paginator};
pub use rate_limit::{
    DEFAULT_ENDPOINT_LIMIT, EndpointQuota, QUOTA_WINDOW, RateLimitState, RateLimitStatus,
};
pub use transport::{HttpMethod, HttpRequest, RawResponse, ReqwestTransport, Transport, TransportError};
