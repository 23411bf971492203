use crate::data::Entity;
use crate::rules::Verdict;
use crate::{BLOCKER_TARGET, CONSOLE_TARGET, Error};
use std::fmt::Display;
use std::path::Path;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Activity log file name
pub const ACTIVITY_LOG_FILE: &str = "sweeper";

/// Initialize the logging system with console and file outputs
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init(default_level: &str) -> Result<(), Error> {
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    let activity_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, ACTIVITY_LOG_FILE);

    // Human-readable console output
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // JSON activity log
    let activity_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(activity_file);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        // HTTP internals are noisy at info
        Err(_) => EnvFilter::try_new(default_level)?
            .add_directive("hyper=warn".parse()?)
            .add_directive("hyper_util=warn".parse()?)
            .add_directive("reqwest=warn".parse()?)
            .add_directive("rustls=warn".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(activity_layer)
        .try_init()?;

    info!("Logging system initialized");
    Ok(())
}

/// Totals printed whenever a new round of topics is collected
pub fn log_cycle_summary(blocked: u64, clean: u64) {
    info!(
        target: BLOCKER_TARGET,
        blocked,
        clean,
        event = "cycle",
        "Blocked: {blocked}\tClean: {clean}"
    );
}

/// Record a block together with the rules that caused it
pub fn log_block(entity: &Entity, verdict: &Verdict) {
    let rules = verdict
        .evidence
        .iter()
        .map(|e| format!("{}: {}", e.predicate, e.matched.join(" ")))
        .collect::<Vec<_>>()
        .join("; ");

    info!(
        target: BLOCKER_TARGET,
        user_id = %entity.id_str,
        screen_name = %entity.screen_name,
        rules = %rules,
        event = "block",
        "Blocked {entity}"
    );
}

pub fn log_console(message: impl Display) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}
