//! Livesync - headless synchronization agent
//!
//! Wires the cache, the domain coordinators and the live update client to the
//! HTTP API described by the environment, and logs what they observe.

use std::sync::Arc;

use livesync::clock::{SharedClock, SystemClock};
use livesync::coordinator::Visibility;
use livesync::transport::{HttpFetcher, HttpStreamConnector, StaticToken, TokenSource};
use livesync::{Config, DomainRegistry, LiveClient, SharedCache};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LIVE_STREAM_PATH: &str = "/admin/live/stream";
const LIVE_STATS_PATH: &str = "/admin/live/stats";

/// Main entry point for the synchronization agent.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the shared cache and the domain registry
/// 4. Start the live update client and open its stream
/// 5. Load the active tab
/// 6. Log live updates; SIGUSR1 acts as the "page visible again" signal
/// 7. Disconnect and stop on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livesync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting livesync agent");

    let config = Config::from_env();
    info!(
        "Configuration loaded: api={}, min_refresh_interval={}ms, active_tab={}, max_reconnect_attempts={}",
        config.api_base_url,
        config.min_refresh_interval.as_millis(),
        config.active_tab,
        config.live.max_reconnect_attempts
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let cache = SharedCache::new(clock.clone());
    let http = reqwest::Client::builder().build()?;
    let tokens: Arc<dyn TokenSource> = Arc::new(StaticToken::new(config.auth_token.clone()));

    let registry = DomainRegistry::with_http(
        &config,
        http.clone(),
        Arc::clone(&tokens),
        cache.clone(),
        clock,
    );
    info!("Domain registry initialized");

    let live = LiveClient::spawn(
        config.live.clone(),
        Arc::new(HttpStreamConnector::new(
            http.clone(),
            &config.api_base_url,
            LIVE_STREAM_PATH,
        )),
        Arc::new(HttpFetcher::new(
            http,
            &config.api_base_url,
            LIVE_STATS_PATH,
            Arc::clone(&tokens),
        )),
        tokens,
        cache.clone(),
    )
    .await;

    if let Err(err) = live.connect().await {
        warn!("Live updates unavailable: {}", err);
    }

    if let Err(err) = registry.refresh_current_tab().await {
        warn!("Initial load failed: {}", err);
    }

    let mut live_updates = live.subscribe();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    #[cfg(unix)]
    let mut visible = signal::unix::signal(signal::unix::SignalKind::user_defined1())?;

    loop {
        #[cfg(unix)]
        let became_visible = visible.recv();
        #[cfg(not(unix))]
        let became_visible = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = &mut shutdown => break,
            _ = became_visible => {
                match registry.on_visibility_change(Visibility::Visible).await {
                    Ok(_) => info!("Active tab refreshed"),
                    Err(err) => warn!("Refresh on visibility failed: {}", err),
                }
            }
            changed = live_updates.changed() => {
                if changed.is_err() {
                    warn!("Live client stopped");
                    break;
                }
                let snapshot = live_updates.borrow_and_update().clone();
                info!(
                    state = %snapshot.state,
                    degraded = snapshot.degraded,
                    metrics = snapshot.stats.as_ref().map(|m| m.len()).unwrap_or(0),
                    "Live update"
                );
            }
        }
    }

    live.shutdown().await;
    let stats = cache.stats().await;
    info!(
        "Shutdown complete: cache hits={}, misses={}, hit_rate={:.2}, entries={}",
        stats.hits,
        stats.misses,
        stats.hit_rate(),
        stats.total_entries
    );
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
