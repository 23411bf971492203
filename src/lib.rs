pub mod api;
pub mod blocker;
pub mod config;
pub mod data;
pub mod logging;
pub mod queue;
pub mod rules;

// Log targets, so the file layer can be filtered per concern
pub const API_TARGET: &str = "bot_sweeper::api";
pub const QUEUE_TARGET: &str = "bot_sweeper::queue";
pub const BLOCKER_TARGET: &str = "bot_sweeper::blocker";
pub const ERROR_TARGET: &str = "bot_sweeper::error";
pub const CONSOLE_TARGET: &str = "bot_sweeper";

pub use api::{ApiClient, ApiError, ApiResult, Fetched, RateLimitPolicy, RateLimitState};
pub use blocker::{BlockerError, BlockerResult, BlockerService};
pub use data::Entity;
pub use queue::{DedupQueue, KeyValueStore, QueueError, QueueResult};
pub use rules::{RuleEngine, Verdict};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
