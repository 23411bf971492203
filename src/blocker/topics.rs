//! Topic discovery
//!
//! Topics come from three places: the API's regional trends, an external
//! signal feed of trending hashtags and nouns, and the account's own friends
//! (searched as `to:<handle>` to find whoever is replying to them).

use crate::BLOCKER_TARGET;
use crate::api::{
    ApiClient, ApiError, ApiRequest, ApiResult, Fetched, HttpMethod, HttpRequest, Transport,
};
use crate::blocker::BlockerResult;
use crate::data::{AccountInfo, TrendLocation, UserPage};
use crate::queue::{DedupQueue, QueueError};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const TRENDS_ENDPOINT: &str = "trends/place";
pub const VERIFY_CREDENTIALS_ENDPOINT: &str = "account/verify_credentials";
pub const FRIENDS_ENDPOINT: &str = "friends/list";
/// Region whose trends are searched when nothing else is configured
pub const DEFAULT_TRENDS_WOEID: u64 = 23_424_977;
pub const DEFAULT_SIGNAL_FEED_URL: &str = "https://mario-blob-prod.azureedge.net/data/data-2.json";

/// Signal feed categories and whether their entries are hashtags
const SIGNAL_CATEGORIES: [(&str, bool); 4] = [
    ("topHashtags", true),
    ("breakoutHashtags", true),
    ("topNouns", false),
    ("breakoutNouns", false),
];

/// Unauthenticated JSON feed of trending terms
#[derive(Clone)]
pub struct SignalFeed {
    transport: Arc<dyn Transport>,
    url: String,
}

impl SignalFeed {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }

    /// Current topics; any failure is logged and yields none
    pub async fn topics(&self) -> BTreeSet<String> {
        if self.url.is_empty() {
            return BTreeSet::new();
        }
        info!(target: BLOCKER_TARGET, url = %self.url, "Collecting signal feed topics");
        match self.fetch().await {
            Ok(document) => {
                let topics = parse_signal_feed(&document);
                debug!(target: BLOCKER_TARGET, topics = ?topics, "Signal feed topics");
                topics
            }
            Err(e) => {
                warn!(target: BLOCKER_TARGET, error = %e, "Signal feed unavailable");
                BTreeSet::new()
            }
        }
    }

    async fn fetch(&self) -> ApiResult<Value> {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: self.url.clone(),
            params: Vec::new(),
            body: None,
            authorization: None,
        };
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if !(200..300).contains(&response.status) {
            return Err(ApiError::Transport(format!(
                "unexpected status {}",
                response.status
            )));
        }
        serde_json::from_str(&response.body).map_err(|e| ApiError::malformed(&self.url, e))
    }
}

/// Extract topics from a signal feed document
///
/// Hashtag categories yield `#<name>`, noun categories the bare name, both
/// lowercased. Missing categories and nameless rows are ignored.
#[must_use]
pub fn parse_signal_feed(document: &Value) -> BTreeSet<String> {
    let mut topics = BTreeSet::new();
    for (category, hashtag) in SIGNAL_CATEGORIES {
        let rows = document
            .get(category)
            .and_then(|c| c.get("data"))
            .and_then(Value::as_array);
        for row in rows.into_iter().flatten() {
            let Some(name) = row.get("name").and_then(Value::as_str) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let name = name.to_lowercase();
            topics.insert(if hashtag { format!("#{name}") } else { name });
        }
    }
    topics
}

/// Trend names for a region
///
/// # Errors
///
/// Returns the client's error if the trends cannot be fetched or decoded.
pub async fn trend_topics(client: &ApiClient, woeid: u64) -> ApiResult<BTreeSet<String>> {
    info!(target: BLOCKER_TARGET, woeid, "Collecting trends");
    let request = ApiRequest::get(TRENDS_ENDPOINT).param("id", woeid);
    let locations: Vec<TrendLocation> = client.fetch_json(&request).await?;
    let trends: BTreeSet<String> = locations
        .into_iter()
        .next()
        .map(|location| location.trends.into_iter().map(|t| t.name).collect())
        .unwrap_or_default();
    debug!(target: BLOCKER_TARGET, trends = ?trends, "Trends");
    Ok(trends)
}

/// `to:<handle>` topics for everyone the account follows
///
/// Friends are marked clean on the way so they are never blocked. Friend
/// listings are rate limited hard, so a throttled or failed page ends the
/// collection early instead of waiting.
///
/// # Errors
///
/// Only fatal API or store errors are returned.
pub async fn friend_topics(client: &ApiClient, queue: &DedupQueue) -> BlockerResult<BTreeSet<String>> {
    let mut topics = BTreeSet::new();

    let account: AccountInfo = match client
        .fetch_json(&ApiRequest::get(VERIFY_CREDENTIALS_ENDPOINT))
        .await
    {
        Ok(account) => account,
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            warn!(target: BLOCKER_TARGET, error = %e, "Skipping friend collection for now");
            return Ok(topics);
        }
    };

    let request = ApiRequest::get(FRIENDS_ENDPOINT)
        .param("screen_name", &account.screen_name)
        .surface_rate_limit();
    let mut pages = client.paginate(request);

    loop {
        let body = match pages.next_page().await {
            Ok(Some(Fetched::Ready(body))) => body,
            Ok(Some(Fetched::Throttled { reset_at })) => {
                warn!(target: BLOCKER_TARGET, reset_at, "Skipping friend collection for now");
                break;
            }
            Ok(None) => break,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(target: BLOCKER_TARGET, error = %e, "Skipping friend collection for now");
                break;
            }
        };

        let page: UserPage = match serde_json::from_value(body) {
            Ok(page) => page,
            Err(e) => {
                warn!(target: BLOCKER_TARGET, error = %e, "Malformed friends page, ignoring");
                continue;
            }
        };
        for friend in page.users {
            if friend.screen_name.is_empty() {
                continue;
            }
            match queue.mark_clean(&friend.id_str).await {
                Ok(_) => {}
                Err(e @ QueueError::ConflictingDisposition { .. }) => {
                    warn!(target: BLOCKER_TARGET, friend = %friend, error = %e, "Friend was blocked earlier");
                }
                Err(e) => return Err(e.into()),
            }
            topics.insert(format!("to:{}", friend.screen_name));
        }
    }

    info!(target: BLOCKER_TARGET, friends = topics.len(), "Collected friends");
    Ok(topics)
}
