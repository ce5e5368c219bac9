//! Session directory server for the inklist drawing protocol.

mod api;
mod config;
mod db;
mod error;
mod peers;
mod ratelimit;
mod validation;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::api::rest::handlers::AppState;
use crate::api::rest::routes::create_router;
use crate::config::Config;
use crate::db::Store;
use crate::db::models::QueryOptions;
use crate::peers::Aggregator;
use crate::ratelimit::{BucketMap, SWEEP_INTERVAL_SECS};

/// Wire-protocol identifier reported by the root endpoint.
pub const API_NAME: &str = "inklist-session-directory";

/// Listing API revision.
pub const API_VERSION: &str = "1.9";

/// Where this server's source lives, reported by the root endpoint.
pub const SOURCE_URL: &str = "https://github.com/inklist/inklist";

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Parser)]
#[command(name = "inklist-server", disable_version_flag = true)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Listening address
    #[arg(short = 'l', long = "listen")]
    listen: Option<String>,

    /// Database path
    #[arg(short = 'd', long = "database")]
    database: Option<String>,

    /// Include sessions from this server
    #[arg(short = 's', long = "include-server")]
    include_server: Option<String>,

    /// Show version plus API revision and exit
    #[arg(short = 'v', long = "version")]
    version: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.version {
        println!(
            "inklist-{} ({}@{})",
            env!("CARGO_PKG_VERSION"),
            API_NAME,
            API_VERSION
        );
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    let mut cfg = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    // Command line flags win over file and environment.
    if let Some(listen) = args.listen {
        cfg.listen = listen;
    }
    if let Some(database) = args.database {
        cfg.database = database;
    }
    if let Some(server) = args.include_server {
        cfg.include_servers = vec![server];
    }
    if cfg.database == "none" {
        cfg.database.clear();
    }

    let store = if cfg.read_only() {
        info!("no database configured, serving in read-only mode");
        None
    } else {
        Some(Store::open(&cfg.database, cfg.session_timeout).await?)
    };

    let peers = Arc::new(Aggregator::new(
        Duration::from_secs(cfg.include_cache_ttl),
        Duration::from_secs(cfg.include_status_cache_ttl),
        Duration::from_secs(cfg.include_timeout),
    )?);

    let state = AppState {
        cfg: Arc::new(cfg.clone()),
        store: store.clone(),
        limiter: Arc::new(BucketMap::new()),
        peers: peers.clone(),
    };

    // Background work: prewarm the peer cache, purge stale rows daily, and
    // evict idle rate-limit buckets.
    if !cfg.include_servers.is_empty() {
        info!(servers = ?cfg.include_servers, "including sessions from peers");
        let urls = cfg.include_servers.clone();
        let peers = peers.clone();
        tokio::spawn(async move {
            peers.fetch_filtered(&QueryOptions::default(), &urls).await;
        });
    }

    if let Some(store) = store.clone() {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = store.cleanup().await {
                    error!("session cleanup failed: {err}");
                }
            }
        });
    }

    {
        let limiter = state.limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        });
    }

    let app = create_router(state);

    let listener = TcpListener::bind(&cfg.listen).await?;
    info!("listening at http://{}", cfg.listen);

    // In-flight requests get a grace period of one session timeout (as
    // seconds) after the shutdown signal; then the listener is forced closed.
    let (grace_tx, grace_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown = async move {
        shutdown_signal().await;
        let _ = grace_tx.send(());
    };

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .into_future();

    let grace_secs = u64::from(cfg.session_timeout);
    tokio::select! {
        result = serve => result?,
        _ = async {
            let _ = grace_rx.await;
            tokio::time::sleep(Duration::from_secs(grace_secs)).await;
        } => {
            warn!("shutdown grace period elapsed, closing remaining connections");
        }
    }

    if let Some(store) = store {
        store.close().await;
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down..."),
        _ = terminate => info!("received SIGTERM, shutting down..."),
    }
}
