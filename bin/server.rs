// townhall - Web Server
// REST API with Axum over the SQLite document store

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use townhall::api::{router, AppState};
use townhall::{open_database, Config, VerificationCodes, VoteEngine};

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("townhall server v{}", townhall::VERSION);
    let config = Config::load()?;

    let conn = open_database(&config.db_path)
        .with_context(|| format!("Failed to open database at {:?}", config.db_path))?;
    info!("Database opened: {:?}", config.db_path);

    let engine = VoteEngine::new(config.vote_max_attempts);
    info!("Vote engine: up to {} attempts per contended vote", engine.max_attempts());

    let state = AppState::new(
        conn,
        engine,
        VerificationCodes::new(config.code_ttl),
    );
    let app = router(state);

    let address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
