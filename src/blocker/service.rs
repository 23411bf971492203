//! Blocking service
//!
//! Discovers accounts by searching topics, queues them, evaluates each one
//! against the rules and blocks or clears it. One search is made per pacing
//! interval so the search quota lasts the whole window.

use crate::api::{ApiClient, ApiError, ApiRequest, Transport};
use crate::blocker::topics::{
    DEFAULT_SIGNAL_FEED_URL, DEFAULT_TRENDS_WOEID, SignalFeed, friend_topics, trend_topics,
};
use crate::blocker::BlockerResult;
use crate::data::{Entity, SearchResponse, UserPage};
use crate::logging::{log_block, log_cycle_summary};
use crate::queue::DedupQueue;
use crate::rules::RuleEngine;
use crate::{BLOCKER_TARGET, ERROR_TARGET};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const SEARCH_ENDPOINT: &str = "search/tweets";
pub const BLOCK_ENDPOINT: &str = "blocks/create";
pub const FOLLOWERS_ENDPOINT: &str = "followers/list";

/// Tunables of the blocking loop
#[derive(Debug, Clone)]
pub struct BlockerSettings {
    /// Region whose trends are searched
    pub trends_woeid: u64,
    /// Signal feed location; empty disables the feed
    pub signal_feed_url: String,
    /// Statuses requested per search
    pub search_count: u32,
    /// Followers requested by [`BlockerService::add_followers_to_queue`]
    pub follower_page_size: u32,
}

impl Default for BlockerSettings {
    fn default() -> Self {
        Self {
            trends_woeid: DEFAULT_TRENDS_WOEID,
            signal_feed_url: DEFAULT_SIGNAL_FEED_URL.to_string(),
            search_count: 100,
            follower_page_size: 200,
        }
    }
}

/// Outcome of one queue drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Entities popped from the queue
    pub popped: u64,
    /// Popped entities that were already disposed
    pub skipped: u64,
    pub blocked: u64,
    pub clean: u64,
    /// Entities dropped after a non-fatal error
    pub failed: u64,
}

impl DrainSummary {
    /// Entities that were actually evaluated
    #[must_use]
    pub fn evaluated(&self) -> u64 {
        self.popped - self.skipped
    }
}

/// Discover, evaluate, and block
pub struct BlockerService {
    client: Arc<ApiClient>,
    queue: DedupQueue,
    rules: RuleEngine,
    signal_feed: SignalFeed,
    settings: BlockerSettings,
}

impl BlockerService {
    /// Create a service; `feed_transport` fetches the unauthenticated signal feed
    pub fn new(
        client: Arc<ApiClient>,
        queue: DedupQueue,
        rules: RuleEngine,
        feed_transport: Arc<dyn Transport>,
        settings: BlockerSettings,
    ) -> Self {
        let signal_feed = SignalFeed::new(feed_transport, settings.signal_feed_url.clone());
        Self {
            client,
            queue,
            rules,
            signal_feed,
            settings,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &DedupQueue {
        &self.queue
    }

    /// Search recent statuses on a topic and queue their authors
    ///
    /// Only statuses newer than the topic's watermark are requested; the
    /// watermark is advanced to the newest status seen. Returns the number of
    /// statuses found.
    ///
    /// # Errors
    ///
    /// Returns API errors other than malformed bodies, and store errors.
    pub async fn search_topic(&self, topic: &str) -> BlockerResult<usize> {
        info!(target: BLOCKER_TARGET, topic = %topic, "Searching for statuses");
        let since_id = self.queue.topic_watermark(topic).await?;
        let request = ApiRequest::get(SEARCH_ENDPOINT)
            .param("q", topic)
            .param("count", self.settings.search_count)
            .param("result_type", "recent")
            .param("since_id", since_id);

        let response: SearchResponse = match self.client.fetch_json(&request).await {
            Ok(response) => response,
            Err(ApiError::Malformed { message, .. }) => {
                warn!(target: BLOCKER_TARGET, topic = %topic, error = %message, "Malformed search response, ignoring");
                SearchResponse::default()
            }
            Err(e) => return Err(e.into()),
        };

        let mut newest = None;
        for status in &response.statuses {
            self.queue.enqueue(&status.user).await?;
            newest = newest.max(Some(status.id));
        }
        if let Some(newest) = newest {
            let watermark = self.queue.advance_topic_watermark(topic, newest).await?;
            debug!(target: BLOCKER_TARGET, topic = %topic, watermark, "Topic watermark advanced");
        }

        Ok(response.statuses.len())
    }

    /// Queue the first page of an account's followers
    ///
    /// # Errors
    ///
    /// Returns API errors other than malformed bodies, and store errors.
    pub async fn add_followers_to_queue(&self, user_id: &str) -> BlockerResult<usize> {
        let request = ApiRequest::get(FOLLOWERS_ENDPOINT)
            .param("count", self.settings.follower_page_size)
            .param("user_id", user_id);

        let page: UserPage = match self.client.fetch_json(&request).await {
            Ok(page) => page,
            Err(ApiError::Malformed { message, .. }) => {
                warn!(target: BLOCKER_TARGET, user_id = %user_id, error = %message, "Malformed followers response, ignoring");
                UserPage::default()
            }
            Err(e) => return Err(e.into()),
        };

        for follower in &page.users {
            self.queue.enqueue(follower).await?;
        }
        info!(target: BLOCKER_TARGET, user_id = %user_id, followers = page.users.len(), "Followers queued");
        Ok(page.users.len())
    }

    /// Block an account and record it
    ///
    /// An account that no longer exists counts as blocked.
    ///
    /// # Errors
    ///
    /// Returns the API error if the block could not be issued, or a queue
    /// error if it could not be recorded.
    pub async fn block_user(&self, user_id: &str) -> BlockerResult<()> {
        let request = ApiRequest::post(BLOCK_ENDPOINT)
            .param("user_id", user_id)
            .param("skip_status", 1)
            .param("include_entities", false);

        match self.client.fetch(&request).await {
            Ok(_) => {}
            Err(ApiError::NotFound { .. }) => {
                debug!(target: BLOCKER_TARGET, user_id = %user_id, "Account already gone");
            }
            Err(e) => return Err(e.into()),
        }

        self.queue.mark_blocked(user_id).await?;
        Ok(())
    }

    /// Evaluate every queued entity
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned; anything else drops the entity.
    pub async fn process_queue(&self) -> BlockerResult<DrainSummary> {
        self.drain(None).await
    }

    /// Gather the next round of topics from every source
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned; a failing source contributes nothing.
    pub async fn collect_topics(&self) -> BlockerResult<BTreeSet<String>> {
        let mut topics = self.signal_feed.topics().await;

        match trend_topics(&self.client, self.settings.trends_woeid).await {
            Ok(trends) => topics.extend(trends),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(target: BLOCKER_TARGET, error = %e, "Skipping trends for now");
            }
        }

        topics.extend(friend_topics(&self.client, &self.queue).await?);
        info!(target: BLOCKER_TARGET, topics = topics.len(), "Topics collected");
        Ok(topics)
    }

    /// Run until `shutdown` turns true or a fatal error occurs
    ///
    /// The store is flushed before returning either way.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the loop, or the flush failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> BlockerResult<()> {
        let result = self.run_loop(&mut shutdown).await;
        if let Err(e) = &result {
            error!(target: ERROR_TARGET, error = %e, "Blocking loop stopped");
        }

        info!(target: BLOCKER_TARGET, "Flushing store");
        match self.queue.flush().await {
            Ok(()) => result,
            Err(e) => {
                error!(target: ERROR_TARGET, error = %e, "Failed to flush store");
                result.and(Err(e.into()))
            }
        }
    }

    async fn run_loop(&self, shutdown: &mut watch::Receiver<bool>) -> BlockerResult<()> {
        // backlog from the previous run first
        self.drain(Some(&*shutdown)).await?;

        let mut topics = BTreeSet::new();
        while !*shutdown.borrow() {
            if topics.is_empty() {
                let blocked = self.queue.blocked_count().await?;
                let clean = self.queue.clean_count().await?;
                log_cycle_summary(blocked, clean);
                self.checkpoint().await;
                topics = self.collect_topics().await?;
                if topics.is_empty() {
                    warn!(target: BLOCKER_TARGET, "No topics collected");
                }
            }

            if let Some(topic) = topics.pop_first() {
                match self.search_topic(&topic).await {
                    Ok(found) => {
                        debug!(target: BLOCKER_TARGET, topic = %topic, found, "Topic searched");
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(target: BLOCKER_TARGET, topic = %topic, error = %e, "Topic search failed");
                    }
                }
                self.drain(Some(&*shutdown)).await?;
            }

            if self.pause(shutdown).await {
                break;
            }
        }

        info!(target: BLOCKER_TARGET, "Shutdown requested");
        Ok(())
    }

    /// Flush between rounds so a killed process loses at most one round
    async fn checkpoint(&self) {
        if let Err(e) = self.queue.flush().await {
            warn!(target: BLOCKER_TARGET, error = %e, "Periodic flush failed");
        }
    }

    /// Sleep one pacing interval; returns true when the shutdown sender is gone
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let interval = self.client.rate_limits().pacing_interval(SEARCH_ENDPOINT);
        debug!(target: BLOCKER_TARGET, seconds = interval.as_secs_f64(), "Pacing");
        tokio::select! {
            () = self.client.clock().sleep(interval) => false,
            changed = shutdown.changed() => changed.is_err(),
        }
    }

    async fn drain(&self, shutdown: Option<&watch::Receiver<bool>>) -> BlockerResult<DrainSummary> {
        let mut summary = DrainSummary::default();

        while !shutdown.is_some_and(|s| *s.borrow()) {
            let Some(entity) = self.queue.dequeue_one().await? else {
                break;
            };
            summary.popped += 1;

            if self.queue.is_disposed(&entity.id_str).await? {
                summary.skipped += 1;
                continue;
            }

            match self.dispose(&entity).await {
                Ok(true) => summary.blocked += 1,
                Ok(false) => summary.clean += 1,
                Err(e) if e.is_cancelled() => {
                    // still undecided, the next run picks it up again
                    self.queue.enqueue(&entity).await?;
                    info!(target: BLOCKER_TARGET, entity = %entity, "Entity returned to the queue");
                    break;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    summary.failed += 1;
                    warn!(target: BLOCKER_TARGET, entity = %entity, error = %e, "Could not dispose of entity");
                }
            }
        }

        info!(
            target: BLOCKER_TARGET,
            blocked = summary.blocked,
            evaluated = summary.evaluated(),
            "Blocked {} users out of {}",
            summary.blocked,
            summary.evaluated()
        );
        Ok(summary)
    }

    /// Returns whether the entity was blocked
    async fn dispose(&self, entity: &Entity) -> BlockerResult<bool> {
        let verdict = self.rules.evaluate(entity);
        if verdict.blockworthy {
            self.block_user(&entity.id_str).await?;
            log_block(entity, &verdict);
            Ok(true)
        } else {
            self.queue.mark_clean(&entity.id_str).await?;
            Ok(false)
        }
    }
}
