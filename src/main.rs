use bot_sweeper::api::{ApiClient, RateLimitState, ReqwestTransport, SystemClock, Transport};
use bot_sweeper::blocker::BlockerService;
use bot_sweeper::config::{Args, load_rules};
use bot_sweeper::logging::{self, log_console};
use bot_sweeper::queue::{DedupQueue, KeyValueStore, MemoryStore, RedisStore};
use bot_sweeper::rules::RuleEngine;
use bot_sweeper::{ERROR_TARGET, Error};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Open the configured store
async fn open_store(args: &Args) -> Result<Arc<dyn KeyValueStore>, Error> {
    if let Some(path) = &args.memory_store {
        info!(path = %path.display(), "Using in-memory store");
        return Ok(Arc::new(MemoryStore::load(path).await?));
    }

    let options = args.redis_options();
    let store = RedisStore::new(&options)?;
    store.ping().await?;
    info!(url = %options.url(), "Connected to Redis");
    Ok(Arc::new(store))
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn stop_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())?.recv().await;
        Ok::<(), std::io::Error>(())
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<()>>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        result = terminate => result,
    }
}

/// Main function to run the sweeper
async fn async_main() -> Result<(), Error> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    let rules = RuleEngine::new(load_rules(&args.rules).await?);
    info!(
        rules = %args.rules.display(),
        predicates = rules.predicate_names().count(),
        "Rules loaded"
    );

    let store = open_store(&args).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(args.request_timeout())?);
    let client = ApiClient::new(
        transport.clone(),
        args.credential_source()?,
        Arc::new(SystemClock),
        RateLimitState::new(),
        args.client_settings(),
    )
    .await?
    .with_shutdown(shutdown_rx.clone());

    if let Err(e) = client.refresh_rate_limits().await {
        warn!(error = %e, "Could not fetch rate limits, using defaults");
    }

    let service = BlockerService::new(
        Arc::new(client),
        DedupQueue::new(store),
        rules,
        transport,
        args.blocker_settings(),
    );

    tokio::spawn(async move {
        if let Err(e) = stop_signal().await {
            error!(target: ERROR_TARGET, error = %e, "Failed to listen for stop signals");
            // keep the sender alive so the loop is not mistaken for shut down
            std::future::pending::<()>().await;
        }
        log_console("Shutdown requested, finishing current work; signal again to exit immediately");
        let _ = shutdown_tx.send(true);

        if stop_signal().await.is_ok() {
            log_console("Exiting without flushing the store");
            std::process::exit(130);
        }
    });

    info!("Starting sweeper...");
    service.run(shutdown_rx).await?;
    log_console("Sweeper stopped");
    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
