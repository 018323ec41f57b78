//! Evidence Intake Server
//!
//! Receives large evidence files in chunks, verifies them against the
//! client-declared hash and records chain-of-custody metadata next to each
//! committed artifact.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evidence_intake::config::Config;
use evidence_intake::routes;
use evidence_intake::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "evidence_intake=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Evidence Intake v{}", env!("CARGO_PKG_VERSION"));
    match &config.storage.upload_folder {
        Some(folder) => {
            tokio::fs::create_dir_all(folder)
                .await
                .with_context(|| format!("Failed to create upload folder {}", folder.display()))?;
            tracing::info!("Upload folder: {}", folder.display());
        }
        None => tracing::warn!("UPLOAD_FOLDER not set, chunk uploads will be rejected"),
    }
    tracing::info!(
        "Hash algorithm: {}, max file size: {} GB",
        config.uploads.hash_algorithm,
        config.storage.max_file_size_gb
    );

    // Create application state
    let app_state = AppState::new(&config);

    // Evict idle sessions and hash calculations in the background
    let eviction = app_state
        .uploads()
        .clone()
        .start_eviction_task(config.sweep_interval());

    // Build router
    let app = routes::app(app_state, config.max_chunk_bytes());

    // Start server with graceful shutdown
    let ip = config
        .server
        .host
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("Invalid SERVER_HOST {}", config.server.host))?;
    let addr = SocketAddr::from((ip, config.server.port));
    tracing::info!("Evidence Intake listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    eviction.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
