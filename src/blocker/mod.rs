//! The blocking loop
//!
//! [`BlockerService`] ties the API client, the dedup queue, and the rule
//! engine together: topics are collected, searched, and every author found
//! is evaluated once.

mod error;
mod service;
mod topics;

pub use error::{BlockerError, BlockerResult};
pub use service::{
    BLOCK_ENDPOINT, BlockerService, BlockerSettings, DrainSummary, FOLLOWERS_ENDPOINT,
    SEARCH_ENDPOINT,
};
pub use topics::{
    DEFAULT_SIGNAL_FEED_URL, DEFAULT_TRENDS_WOEID, FRIENDS_ENDPOINT, SignalFeed, TRENDS_ENDPOINT,
    VERIFY_CREDENTIALS_ENDPOINT, friend_topics, parse_signal_feed, trend_topics,
};
