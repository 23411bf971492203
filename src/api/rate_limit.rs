//! Shared rate limit bookkeeping
//!
//! One [`RateLimitState`] is shared by everything talking to the API so quota
//! accounting stays correct when several tasks use the same client.

use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Length of the API's quota window
pub const QUOTA_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Ceiling assumed for an endpoint that has not been observed yet
pub const DEFAULT_ENDPOINT_LIMIT: u32 = 180;

/// Per-endpoint quota ceilings plus the latest reset time seen anywhere
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    limits: Arc<DashMap<String, u32>>,
    reset_time: Arc<AtomicI64>,
}

impl RateLimitState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest reset time observed, in epoch seconds
    #[must_use]
    pub fn reset_time(&self) -> i64 {
        self.reset_time.load(Ordering::SeqCst)
    }

    /// Raise the reset floor; smaller values are ignored
    pub fn observe_reset(&self, reset_at: i64) -> i64 {
        let previous = self.reset_time.fetch_max(reset_at, Ordering::SeqCst);
        previous.max(reset_at)
    }

    /// Record the quota ceiling for an endpoint
    pub fn set_limit(&self, endpoint: &str, limit: u32) {
        self.limits.insert(normalize_endpoint(endpoint), limit);
    }

    /// Quota ceiling for an endpoint, if known
    #[must_use]
    pub fn limit(&self, endpoint: &str) -> Option<u32> {
        self.limits.get(&normalize_endpoint(endpoint)).map(|v| *v)
    }

    /// Number of endpoints with a known ceiling
    #[must_use]
    pub fn known_endpoints(&self) -> usize {
        self.limits.len()
    }

    /// Seconds left until the quota resets, never negative
    #[must_use]
    pub fn wait_from(&self, now_epoch: i64) -> Duration {
        let remaining = self.reset_time() - now_epoch;
        Duration::from_secs(u64::try_from(remaining).unwrap_or(0))
    }

    /// Delay between calls that spreads an endpoint's quota evenly over the window
    #[must_use]
    pub fn pacing_interval(&self, endpoint: &str) -> Duration {
        let limit = self
            .limit(endpoint)
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_ENDPOINT_LIMIT);
        QUOTA_WINDOW / limit
    }

    /// Apply a `application/rate_limit_status` body
    pub fn apply_status(&self, status: &RateLimitStatus) {
        for endpoints in status.resources.values() {
            for (endpoint, quota) in endpoints {
                self.set_limit(endpoint, quota.limit);
                self.observe_reset(quota.reset);
            }
        }
    }
}

/// Body of the quota-status endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitStatus {
    #[serde(default)]
    pub resources: HashMap<String, HashMap<String, EndpointQuota>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EndpointQuota {
    pub limit: u32,
    #[serde(default)]
    pub remaining: u32,
    pub reset: i64,
}

/// Quota keys come back as `/search/tweets`; requests use `search/tweets`
fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim_start_matches('/').to_string()
}
