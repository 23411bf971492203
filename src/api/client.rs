//! Rate limited API client
//!
//! All four failure modes of a call (rejected credentials, exhausted quota,
//! transient failures, and gone resources) are handled in one retry loop so
//! call sites never carry their own backoff logic.

use crate::API_TARGET;
use crate::api::auth::{CredentialSource, OAuthSigner};
use crate::api::clock::Clock;
use crate::api::error::RequestDiagnostics;
use crate::api::pagination::Paginator;
use crate::api::rate_limit::{RateLimitState, RateLimitStatus};
use crate::api::transport::{HttpMethod, HttpRequest, RawResponse, Transport};
use crate::api::{ApiError, ApiResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};

/// Default base URL of the REST API
pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com/1.1";
/// Endpoint reporting per-endpoint quotas
pub const RATE_LIMIT_STATUS_ENDPOINT: &str = "application/rate_limit_status";

/// What to do when the server reports an exhausted quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitPolicy {
    /// Sleep until the quota resets, then retry
    #[default]
    Wait,
    /// Hand a [`Fetched::Throttled`] back to the caller
    Surface,
}

/// Result of a call that may have been throttled
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Ready(T),
    Throttled { reset_at: i64 },
}

impl<T> Fetched<T> {
    /// Treat throttling as an error
    ///
    /// # Errors
    ///
    /// Returns `ApiError::RateLimited` for a throttled outcome.
    pub fn ready(self, endpoint: &str) -> ApiResult<T> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Throttled { reset_at } => Err(ApiError::RateLimited {
                endpoint: endpoint.to_string(),
                reset_at,
            }),
        }
    }
}

/// A call to one endpoint
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub endpoint: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    pub rate_limit: RateLimitPolicy,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            params: Vec::new(),
            body: None,
            rate_limit: RateLimitPolicy::Wait,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, endpoint)
    }

    /// Add or replace a query parameter
    #[must_use]
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.set_param(key, value);
        self
    }

    /// Add or replace a query parameter in place
    pub fn set_param(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        if let Some(existing) = self.params.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value;
        } else {
            self.params.push((key.to_string(), value));
        }
    }

    /// Attach a JSON body
    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Return throttling to the caller instead of waiting
    #[must_use]
    pub fn surface_rate_limit(mut self) -> Self {
        self.rate_limit = RateLimitPolicy::Surface;
        self
    }
}

/// Tunables of the retry loop
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    /// Transient failures tolerated per call before giving up
    pub fail_limit: u32,
    /// Backoff unit; the n-th consecutive failure waits `n * retry_time`
    pub retry_time: Duration,
    /// Consecutive credential refreshes tolerated per call
    pub max_auth_refreshes: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            fail_limit: 5,
            retry_time: Duration::from_secs(10),
            max_auth_refreshes: 3,
        }
    }
}

struct SignerSlot {
    signer: OAuthSigner,
    generation: u64,
}

/// How one attempt ended
enum Attempt {
    Success(Value),
    AuthInvalid,
    RateLimited { reset_at: i64 },
    NotFound,
    Transient(String),
}

/// Authenticated API client with transparent recovery
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialSource>,
    signer: RwLock<SignerSlot>,
    rate_limits: RateLimitState,
    clock: Arc<dyn Clock>,
    settings: ClientSettings,
    credential_refreshes: AtomicU64,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ApiClient {
    /// Create a client, loading credentials once up front
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Auth` if the credentials cannot be loaded or are incomplete.
    pub async fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
        clock: Arc<dyn Clock>,
        rate_limits: RateLimitState,
        settings: ClientSettings,
    ) -> ApiResult<Self> {
        let signer = OAuthSigner::new(credentials.load().await?)?;
        Ok(Self {
            transport,
            credentials,
            signer: RwLock::new(SignerSlot {
                signer,
                generation: 0,
            }),
            rate_limits,
            clock,
            settings,
            credential_refreshes: AtomicU64::new(0),
            shutdown: None,
        })
    }

    /// Abandon rate limit and backoff waits once `shutdown` turns true
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Shared rate limit state
    #[must_use]
    pub fn rate_limits(&self) -> &RateLimitState {
        &self.rate_limits
    }

    /// Clock the client sleeps on
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Number of credential refreshes performed so far
    #[must_use]
    pub fn credential_refreshes(&self) -> u64 {
        self.credential_refreshes.load(Ordering::SeqCst)
    }

    /// GET an endpoint, waiting out any rate limit
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> ApiResult<Value> {
        let mut request = ApiRequest::get(endpoint);
        for (key, value) in params {
            request.set_param(key, value);
        }
        self.fetch(&request).await
    }

    /// POST to an endpoint, waiting out any rate limit
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn post(&self, endpoint: &str, params: &[(&str, String)]) -> ApiResult<Value> {
        let mut request = ApiRequest::post(endpoint);
        for (key, value) in params {
            request.set_param(key, value);
        }
        self.fetch(&request).await
    }

    /// Perform a request, turning throttling into `ApiError::RateLimited`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn fetch(&self, request: &ApiRequest) -> ApiResult<Value> {
        self.call(request).await?.ready(&request.endpoint)
    }

    /// Perform a request and decode the body
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Malformed` if the body does not decode into `T`, plus
    /// everything [`ApiClient::call`] can return.
    pub async fn fetch_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> ApiResult<T> {
        let body = self.fetch(request).await?;
        serde_json::from_value(body).map_err(|e| ApiError::malformed(&request.endpoint, e))
    }

    /// Iterate over a cursor-paginated endpoint
    #[must_use]
    pub fn paginate(&self, request: ApiRequest) -> Paginator<'_> {
        Paginator::new(self, request)
    }

    /// Refresh the per-endpoint quota table from the quota-status endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be fetched or decoded.
    pub async fn refresh_rate_limits(&self) -> ApiResult<()> {
        let request = ApiRequest::get(RATE_LIMIT_STATUS_ENDPOINT).surface_rate_limit();
        let status: RateLimitStatus = self.fetch_json(&request).await?;
        self.rate_limits.apply_status(&status);
        info!(
            target: API_TARGET,
            endpoints = self.rate_limits.known_endpoints(),
            reset_time = self.rate_limits.reset_time(),
            "Rate limits refreshed"
        );
        Ok(())
    }

    /// Perform one logical call, recovering from everything but gone resources
    ///
    /// # Errors
    ///
    /// - `ApiError::NotFound` when the server says the resource is gone
    /// - `ApiError::ExhaustedRetries` after too many transient failures
    /// - `ApiError::Forbidden` when fresh credentials are still rejected
    /// - `ApiError::Auth` when credentials cannot be loaded at all
    /// - `ApiError::Cancelled` when shutdown interrupts a wait
    pub async fn call(&self, request: &ApiRequest) -> ApiResult<Fetched<Value>> {
        let url = self.endpoint_url(&request.endpoint);
        debug!(target: API_TARGET, method = %request.method, endpoint = %request.endpoint, "API call");

        let mut failures: u32 = 0;
        let mut auth_refreshes: u32 = 0;
        let mut retry_in = Duration::ZERO;

        loop {
            if !retry_in.is_zero() {
                info!(target: API_TARGET, seconds = retry_in.as_secs(), "Waiting to retry");
                self.wait(retry_in, &request.endpoint).await?;
                retry_in = Duration::ZERO;
            }

            let mut diagnostics = RequestDiagnostics {
                method: request.method.to_string(),
                endpoint: request.endpoint.clone(),
                params: request.params.clone(),
                ..Default::default()
            };

            let (http_request, generation) = self.sign(request, &url).await?;
            let attempt = match self.transport.send(&http_request).await {
                Ok(response) => self.classify(&response, &mut diagnostics),
                Err(e) => Attempt::Transient(e.to_string()),
            };

            match attempt {
                Attempt::Success(body) => return Ok(Fetched::Ready(body)),
                Attempt::AuthInvalid => {
                    auth_refreshes += 1;
                    if auth_refreshes > self.settings.max_auth_refreshes {
                        diagnostics.cause = format!(
                            "rejected after {} credential refreshes",
                            self.settings.max_auth_refreshes
                        );
                        error!(target: API_TARGET, diagnostics = %diagnostics, "Credentials keep being rejected");
                        return Err(ApiError::Forbidden(Box::new(diagnostics)));
                    }
                    self.refresh_credentials(generation).await?;
                }
                Attempt::RateLimited { reset_at } => {
                    let reset_time = self.rate_limits.observe_reset(reset_at);
                    warn!(target: API_TARGET, diagnostics = %diagnostics, reset_time, "Rate limit exceeded");
                    if request.rate_limit == RateLimitPolicy::Surface {
                        return Ok(Fetched::Throttled {
                            reset_at: reset_time,
                        });
                    }
                    retry_in = self
                        .rate_limits
                        .wait_from(self.clock.now_epoch())
                        .max(Duration::from_secs(1));
                }
                Attempt::NotFound => {
                    return Err(ApiError::NotFound {
                        endpoint: request.endpoint.clone(),
                    });
                }
                Attempt::Transient(cause) => {
                    diagnostics.cause = cause;
                    if failures >= self.settings.fail_limit {
                        error!(target: API_TARGET, diagnostics = %diagnostics, "Giving up after repeated failures");
                        return Err(ApiError::ExhaustedRetries(Box::new(diagnostics)));
                    }
                    failures += 1;
                    retry_in = self.settings.retry_time * failures;
                    warn!(target: API_TARGET, diagnostics = %diagnostics, failures, "Transient API failure");
                }
            }
        }
    }

    /// Sleep on the clock unless shutdown is requested first
    async fn wait(&self, duration: Duration, endpoint: &str) -> ApiResult<()> {
        let Some(mut shutdown) = self.shutdown.clone() else {
            self.clock.sleep(duration).await;
            return Ok(());
        };
        let cancelled = ApiError::Cancelled {
            endpoint: endpoint.to_string(),
        };
        if *shutdown.borrow_and_update() {
            return Err(cancelled);
        }

        let interrupted = tokio::select! {
            () = self.clock.sleep(duration) => return Ok(()),
            changed = shutdown.wait_for(|stop| *stop) => changed.is_ok(),
        };
        if interrupted {
            info!(target: API_TARGET, endpoint, "Wait abandoned for shutdown");
            return Err(cancelled);
        }
        // sender dropped, nothing can interrupt the wait anymore
        self.clock.sleep(duration).await;
        Ok(())
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}.json",
            self.settings.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    async fn sign(&self, request: &ApiRequest, url: &str) -> ApiResult<(HttpRequest, u64)> {
        let slot = self.signer.read().await;
        let authorization =
            slot.signer
                .authorization(&request.method.to_string(), url, &request.params)?;
        let http_request = HttpRequest {
            method: request.method,
            url: url.to_string(),
            params: request.params.clone(),
            body: request.body.clone(),
            authorization: Some(authorization),
        };
        Ok((http_request, slot.generation))
    }

    /// Reload credentials unless another task already did since `seen_generation`
    async fn refresh_credentials(&self, seen_generation: u64) -> ApiResult<()> {
        let mut slot = self.signer.write().await;
        if slot.generation != seen_generation {
            debug!(target: API_TARGET, "Credentials already refreshed by another task");
            return Ok(());
        }
        let signer = OAuthSigner::new(self.credentials.load().await?)?;
        slot.signer = signer;
        slot.generation += 1;
        self.credential_refreshes.fetch_add(1, Ordering::SeqCst);
        info!(target: API_TARGET, generation = slot.generation, "Credentials refreshed");
        Ok(())
    }

    fn classify(&self, response: &RawResponse, diagnostics: &mut RequestDiagnostics) -> Attempt {
        let status = response.status;
        diagnostics.status_code = Some(status);
        if !response.url.is_empty() {
            diagnostics.encoded_url = Some(response.url.clone());
        }

        let parsed = serde_json::from_str::<Value>(&response.body);
        if let Ok(body) = &parsed {
            if let Some(errors) = body.get("errors") {
                diagnostics.errors = Some(errors.clone());
            }
        }

        match status {
            200..=299 if response.body.trim().is_empty() => Attempt::Success(Value::Null),
            200..=299 => match parsed {
                Ok(body) => Attempt::Success(body),
                Err(e) => {
                    warn!(target: API_TARGET, error = %e, "Malformed response body");
                    Attempt::Transient(format!("malformed body: {e}"))
                }
            },
            401 | 403 => Attempt::AuthInvalid,
            429 => {
                if let Some(limit) = response
                    .header("x-rate-limit-limit")
                    .and_then(|v| v.parse::<u32>().ok())
                {
                    self.rate_limits.set_limit(&diagnostics.endpoint, limit);
                }
                let reset_at = response
                    .header("x-rate-limit-reset")
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or_else(|| {
                        self.clock.now_epoch()
                            + i64::try_from(self.settings.retry_time.as_secs()).unwrap_or(0)
                    });
                Attempt::RateLimited { reset_at }
            }
            404 | 410 => Attempt::NotFound,
            _ => Attempt::Transient(format!("unexpected status {status}")),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::api::auth::Credentials;
    use crate::api::clock::testing::ManualClock;
    use crate::api::transport::TransportError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport replaying canned responses in order and recording requests
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<RawResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(Ok).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn remaining(&self) -> usize {
            self.responses.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError("script exhausted".to_string())))
        }
    }

    /// Credentials that count how often they were loaded
    #[derive(Default)]
    pub struct CountingCredentials {
        pub loads: AtomicU64,
    }

    #[async_trait::async_trait]
    impl CredentialSource for CountingCredentials {
        async fn load(&self) -> ApiResult<Credentials> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(test_credentials())
        }
    }

    pub fn test_credentials() -> Credentials {
        Credentials {
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
            access_token_key: "tk".to_string(),
            access_token_secret: "ts".to_string(),
        }
    }

    pub fn json(status: u16, body: Value) -> RawResponse {
        RawResponse::new(status, body.to_string())
    }

    pub async fn client_with(
        transport: Arc<dyn Transport>,
        clock: Arc<ManualClock>,
    ) -> ApiClient {
        ApiClient::new(
            transport,
            Arc::new(test_credentials()),
            clock,
            RateLimitState::new(),
            ClientSettings {
                base_url: "https://api.example.com/1.1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::api::clock::testing::ManualClock;
    use crate::api::transport::{MockTransport, TransportError};
    use mockall::Sequence;
    use serde_json::json;

    #[tokio::test]
    async fn test_rate_limited_twice_then_success() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            json(429, json!({"errors": [{"code": 88}]})).with_header("x-rate-limit-reset", "1005"),
            json(429, json!({})).with_header("x-rate-limit-reset", "1010"),
            json(200, json!({"ok": true})),
        ]));
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let client = client_with(transport.clone(), clock.clone()).await;

        let body = client.get("search/tweets", &[("q", "rust".to_string())]).await.unwrap();

        assert_eq!(body, json!({"ok": true}));
        assert_eq!(transport.requests().len(), 3);
        assert!(!clock.sleeps().is_empty());
        assert_eq!(clock.sleep_secs(), vec![5, 5]);
        assert_eq!(client.rate_limits().reset_time(), 1_010);
        assert_eq!(client.credential_refreshes(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            json(401, json!({"errors": [{"code": 32}]})),
            json(200, json!({"screen_name": "me"})),
        ]));
        let credentials = Arc::new(CountingCredentials::default());
        let clock = Arc::new(ManualClock::starting_at(0));
        let client = ApiClient::new(
            transport.clone(),
            credentials.clone(),
            clock.clone(),
            RateLimitState::new(),
            ClientSettings::default(),
        )
        .await
        .unwrap();

        let body = client.get("account/verify_credentials", &[]).await.unwrap();

        assert_eq!(body["screen_name"], "me");
        assert_eq!(client.credential_refreshes(), 1);
        // initial load plus one refresh
        assert_eq!(credentials.loads.load(Ordering::SeqCst), 2);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_six_server_errors_exhaust_retries() {
        let transport = Arc::new(ScriptedTransport::new(
            (0..6).map(|_| RawResponse::new(500, "oops")).collect(),
        ));
        let clock = Arc::new(ManualClock::starting_at(0));
        let client = client_with(transport.clone(), clock.clone()).await;

        let error = client.get("search/tweets", &[]).await.unwrap_err();

        match error {
            ApiError::ExhaustedRetries(diagnostics) => {
                assert_eq!(diagnostics.status_code, Some(500));
                assert_eq!(diagnostics.endpoint, "search/tweets");
                assert_eq!(diagnostics.method, "GET");
            }
            other => panic!("Expected ExhaustedRetries, got {other:?}"),
        }
        assert_eq!(transport.requests().len(), 6);
        assert_eq!(clock.sleep_secs(), vec![10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            json(404, json!({"errors": [{"code": 34}]})),
            json(200, json!({})),
        ]));
        let clock = Arc::new(ManualClock::starting_at(0));
        let client = client_with(transport.clone(), clock.clone()).await;

        let error = client
            .post("blocks/create", &[("user_id", "1".to_string())])
            .await
            .unwrap_err();

        assert!(matches!(error, ApiError::NotFound { .. }));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.remaining(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_surface_policy_returns_throttled() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            json(429, json!({}))
                .with_header("x-rate-limit-reset", "2000")
                .with_header("x-rate-limit-limit", "15"),
        ]));
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let client = client_with(transport, clock.clone()).await;

        let request = ApiRequest::get("friends/list").surface_rate_limit();
        let outcome = client.call(&request).await.unwrap();

        assert_eq!(outcome, Fetched::Throttled { reset_at: 2_000 });
        assert!(clock.sleeps().is_empty());
        assert_eq!(client.rate_limits().limit("friends/list"), Some(15));

        let error = outcome.ready("friends/list").unwrap_err();
        assert!(matches!(error, ApiError::RateLimited { reset_at: 2_000, .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            RawResponse::new(200, "<html>upstream hiccup</html>"),
            json(200, json!({"statuses": []})),
        ]));
        let clock = Arc::new(ManualClock::starting_at(0));
        let client = client_with(transport, clock.clone()).await;

        let body = client.get("search/tweets", &[]).await.unwrap();

        assert_eq!(body, json!({"statuses": []}));
        assert_eq!(clock.sleep_secs(), vec![10]);
    }

    #[tokio::test]
    async fn test_persistent_rejection_is_forbidden() {
        let transport = Arc::new(ScriptedTransport::new(
            (0..10).map(|_| RawResponse::new(403, "{}")).collect(),
        ));
        let clock = Arc::new(ManualClock::starting_at(0));
        let client = client_with(transport.clone(), clock).await;

        let error = client
            .post("blocks/create", &[("user_id", "7".to_string())])
            .await
            .unwrap_err();

        match &error {
            ApiError::Forbidden(diagnostics) => {
                assert_eq!(diagnostics.endpoint, "blocks/create");
                assert_eq!(diagnostics.status_code, Some(403));
            }
            other => panic!("Expected Forbidden, got {other:?}"),
        }
        assert!(!error.is_fatal());
        assert_eq!(client.credential_refreshes(), 3);
        assert_eq!(transport.requests().len(), 4);
    }

    /// Loads once, then the secrets become unreadable
    #[derive(Default)]
    struct VanishingCredentials {
        loads: AtomicU64,
    }

    #[async_trait::async_trait]
    impl CredentialSource for VanishingCredentials {
        async fn load(&self) -> ApiResult<crate::api::Credentials> {
            if self.loads.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(test_credentials())
            } else {
                Err(ApiError::Auth("secrets.json: permission denied".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_failed_credential_reload_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            RawResponse::new(401, "{}"),
            json(200, json!({})),
        ]));
        let client = ApiClient::new(
            transport.clone(),
            Arc::new(VanishingCredentials::default()),
            Arc::new(ManualClock::starting_at(0)),
            RateLimitState::new(),
            ClientSettings::default(),
        )
        .await
        .unwrap();

        let error = client.get("account/verify_credentials", &[]).await.unwrap_err();

        assert!(matches!(error, ApiError::Auth(_)));
        assert!(error.is_fatal());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_success_body_is_null() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            RawResponse::new(204, ""),
            json(200, json!({"unused": true})),
        ]));
        let clock = Arc::new(ManualClock::starting_at(0));
        let client = client_with(transport.clone(), clock.clone()).await;

        let body = client
            .post("blocks/create", &[("user_id", "1".to_string())])
            .await
            .unwrap();

        assert_eq!(body, Value::Null);
        assert_eq!(transport.remaining(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_rate_limit_wait() {
        let reset = chrono::Utc::now().timestamp() + 900;
        let transport = Arc::new(ScriptedTransport::new(vec![
            json(429, json!({})).with_header("x-rate-limit-reset", reset.to_string()),
            json(200, json!({})),
        ]));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = ApiClient::new(
            transport.clone(),
            Arc::new(test_credentials()),
            Arc::new(crate::api::SystemClock),
            RateLimitState::new(),
            ClientSettings::default(),
        )
        .await
        .unwrap()
        .with_shutdown(shutdown_rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown_tx.send(true).unwrap();
        });
        let started = tokio::time::Instant::now();
        let error = client
            .post("blocks/create", &[("user_id", "1".to_string())])
            .await
            .unwrap_err();

        assert!(error.is_cancelled());
        assert!(!error.is_fatal());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_is_skipped_after_shutdown() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            RawResponse::new(503, "{}"),
            json(200, json!({})),
        ]));
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);
        let clock = Arc::new(ManualClock::starting_at(0));
        let client = client_with(transport.clone(), clock.clone())
            .await
            .with_shutdown(shutdown_rx);

        let error = client.get("trends/place", &[]).await.unwrap_err();

        assert!(matches!(error, ApiError::Cancelled { ref endpoint } if endpoint == "trends/place"));
        assert!(clock.sleeps().is_empty());
        assert_eq!(transport.remaining(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_are_transient() {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        transport
            .expect_send()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(TransportError("connection reset".to_string())));
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(RawResponse::new(200, r#"{"done": 1}"#)));

        let clock = Arc::new(ManualClock::starting_at(0));
        let client = client_with(Arc::new(transport), clock.clone()).await;

        let body = client.get("trends/place", &[("id", "1".to_string())]).await.unwrap();
        assert_eq!(body["done"], 1);
        assert_eq!(clock.sleep_secs(), vec![10, 20]);
    }

    #[tokio::test]
    async fn test_requests_are_signed_and_addressed() {
        let transport = Arc::new(ScriptedTransport::new(vec![json(200, json!({}))]));
        let clock = Arc::new(ManualClock::starting_at(0));
        let client = client_with(transport.clone(), clock).await;

        client
            .post("/blocks/create", &[("user_id", "99".to_string())])
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://api.example.com/1.1/blocks/create.json");
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].params, vec![("user_id".to_string(), "99".to_string())]);
        let authorization = requests[0].authorization.as_deref().unwrap();
        assert!(authorization.starts_with("OAuth "));
        assert!(authorization.contains("oauth_consumer_key=\"ck\""));
    }

    #[tokio::test]
    async fn test_refresh_rate_limits() {
        let transport = Arc::new(ScriptedTransport::new(vec![json(
            200,
            json!({
                "resources": {
                    "search": {
                        "/search/tweets": { "limit": 450, "remaining": 450, "reset": 5_000 }
                    }
                }
            }),
        )]));
        let clock = Arc::new(ManualClock::starting_at(0));
        let client = client_with(transport.clone(), clock).await;

        client.refresh_rate_limits().await.unwrap();

        assert_eq!(
            transport.requests()[0].url,
            "https://api.example.com/1.1/application/rate_limit_status.json"
        );
        assert_eq!(client.rate_limits().limit("search/tweets"), Some(450));
        assert_eq!(client.rate_limits().reset_time(), 5_000);
        assert_eq!(
            client.rate_limits().pacing_interval("search/tweets"),
            Duration::from_secs(2)
        );
    }

    #[tokio::test]
    async fn test_fetch_json_reports_malformed_shape() {
        let transport = Arc::new(ScriptedTransport::new(vec![json(200, json!({"resources": 5}))]));
        let clock = Arc::new(ManualClock::starting_at(0));
        let client = client_with(transport, clock).await;

        let error = client.refresh_rate_limits().await.unwrap_err();
        assert!(matches!(error, ApiError::Malformed { .. }));
    }

    #[test]
    fn test_request_params_replace() {
        let mut request = ApiRequest::get("friends/list").param("cursor", -1);
        request.set_param("cursor", 111);
        request.set_param("screen_name", "me");
        assert_eq!(
            request.params,
            vec![
                ("cursor".to_string(), "111".to_string()),
                ("screen_name".to_string(), "me".to_string()),
            ]
        );
        assert_eq!(request.rate_limit, RateLimitPolicy::Wait);
    }
}
