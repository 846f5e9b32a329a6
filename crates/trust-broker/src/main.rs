//! Trust Broker
//!
//! Resource server entry point. Verifies bearer tokens from the local and
//! peer regions and serves the verified identity.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trust_broker::config::Config;
use trust_broker::observability::metrics::init_metrics_recorder;
use trust_broker::routes::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trust_broker=info,broker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Trust Broker");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        region = %config.local_region.id,
        realm = %config.local_region.realm(),
        peers = config.peer_regions.len(),
        bind_address = %config.bind_address,
        jwt_algorithm = ?config.jwt_algorithm,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install metrics recorder");
        e
    })?;

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::from_config(config));

    // Warm the key caches. A region that is down now is retried on demand.
    for resolver in state.verifier.lookup().resolvers() {
        match resolver.force_refresh().await {
            Ok(count) => info!(region = %resolver.region(), keys = count, "Key set loaded"),
            Err(e) => warn!(region = %resolver.region(), error = %e, "Initial key fetch failed"),
        }
    }

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!(bind_address = %bind_address, error = %e, "Invalid bind address");
        e
    })?;
    let drain = drain_period();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, drain_seconds = drain.as_secs(), "Trust Broker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(drain))
        .await?;

    info!("Trust Broker shutdown complete");

    Ok(())
}

/// Drain period from `BROKER_DRAIN_SECONDS`; unparseable values fall back to 5s.
fn drain_period() -> Duration {
    let secs = std::env::var("BROKER_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(5);
    Duration::from_secs(secs)
}

/// Resolves on SIGINT or SIGTERM, after `drain` has elapsed.
async fn shutdown_signal(drain: Duration) {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
        "SIGINT"
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let received = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };

    if drain.is_zero() {
        info!(signal = received, "Shutting down without drain period");
        return;
    }

    warn!(signal = received, drain_seconds = drain.as_secs(), "Shutting down, draining connections");
    tokio::time::sleep(drain).await;
}
