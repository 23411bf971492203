//! Command line and configuration files
//!
//! Rules and secrets are YAML files; since YAML is a superset of JSON the
//! usual `rules.json` and `secrets.json` load unchanged.

use crate::api::{ClientSettings, Credentials, CredentialsFile, CredentialSource, DEFAULT_BASE_URL};
use crate::blocker::{BlockerError, BlockerResult, BlockerSettings, DEFAULT_SIGNAL_FEED_URL, DEFAULT_TRENDS_WOEID};
use crate::queue::RedisOptions;
use crate::rules::RulesConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variables consulted when there is no secrets file
pub const CREDENTIAL_ENV_VARS: [&str; 4] = [
    "API_CONSUMER_KEY",
    "API_CONSUMER_SECRET",
    "API_ACCESS_TOKEN_KEY",
    "API_ACCESS_TOKEN_SECRET",
];

#[derive(Parser, Debug, Clone)]
#[command(name = "bot-sweeper", version, about = "Finds and blocks bot accounts")]
pub struct Args {
    /// Rules definition
    #[arg(default_value = "rules.json")]
    pub rules: PathBuf,

    /// API secrets; re-read whenever the credentials are rejected
    #[arg(long, env = "SWEEPER_SECRETS", default_value = "secrets.json")]
    pub secrets: PathBuf,

    /// Redis host
    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    pub host: String,

    /// Redis port
    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub port: u16,

    /// Redis database
    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    pub db: i64,

    /// Keep state in memory, snapshotted to this file, instead of Redis
    #[arg(long)]
    pub memory_store: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "SWEEPER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// API base URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Signal feed URL; pass an empty string to disable the feed
    #[arg(long, default_value = DEFAULT_SIGNAL_FEED_URL)]
    pub signal_feed_url: String,

    /// Region whose trends are searched
    #[arg(long, default_value_t = DEFAULT_TRENDS_WOEID)]
    pub woeid: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

impl Args {
    #[must_use]
    pub fn redis_options(&self) -> RedisOptions {
        RedisOptions {
            host: self.host.clone(),
            port: self.port,
            db: self.db,
        }
    }

    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url.clone(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn blocker_settings(&self) -> BlockerSettings {
        BlockerSettings {
            trends_woeid: self.woeid,
            signal_feed_url: self.signal_feed_url.clone(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// The secrets file if it exists, otherwise the environment
    ///
    /// # Errors
    ///
    /// Returns `BlockerError::Config` if neither provides credentials.
    pub fn credential_source(&self) -> BlockerResult<Arc<dyn CredentialSource>> {
        if self.secrets.exists() {
            return Ok(Arc::new(CredentialsFile::new(&self.secrets)));
        }
        credentials_from_env(|name| std::env::var(name).ok())
            .map(|credentials| Arc::new(credentials) as Arc<dyn CredentialSource>)
            .ok_or_else(|| {
                BlockerError::config(format!(
                    "{} not found and {} are not set",
                    self.secrets.display(),
                    CREDENTIAL_ENV_VARS.join(", ")
                ))
            })
    }
}

/// Credentials from environment variables; `None` unless all four are set
pub fn credentials_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<Credentials> {
    let [consumer_key, consumer_secret, access_token_key, access_token_secret] =
        CREDENTIAL_ENV_VARS.map(|name| lookup(name).filter(|v| !v.trim().is_empty()));
    Some(Credentials {
        consumer_key: consumer_key?,
        consumer_secret: consumer_secret?,
        access_token_key: access_token_key?,
        access_token_secret: access_token_secret?,
    })
}

/// Layout of the rules file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesFile {
    pub rules: RulesConfig,
}

/// Load the rule configuration
///
/// # Errors
///
/// Returns `BlockerError::Config` if the file cannot be read or parsed.
pub async fn load_rules(path: impl AsRef<Path>) -> BlockerResult<RulesConfig> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| BlockerError::config(format!("Failed to read {}: {e}", path.display())))?;
    let file: RulesFile = serde_yaml::from_str(&content)
        .map_err(|e| BlockerError::config(format!("Failed to parse {}: {e}", path.display())))?;
    Ok(file.rules)
}
