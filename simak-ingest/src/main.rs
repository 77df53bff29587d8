//! simak-ingest - Transcript Ingestion Service
//!
//! Accepts transcript spreadsheets over HTTP, queues them durably and
//! persists per-student academic records from a bounded worker pool.

use anyhow::{Context, Result};
use clap::Parser;
use simak_common::config::{self, Deployment, ENCRYPTION_KEY_ENV};
use simak_common::key::resolve_encryption_key;
use simak_ingest::queue::{WorkerOptions, WorkerPool};
use simak_ingest::{AppState, IngestContext};
use std::path::PathBuf;
use tokio::signal;
use tracing::info;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5780";

/// Command-line arguments for simak-ingest
#[derive(Parser, Debug)]
#[command(name = "simak-ingest")]
#[command(about = "Transcript ingestion service for simak")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = config::CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides TOML)
    #[arg(short, long, env = "SIMAK_DATABASE")]
    database: Option<PathBuf>,

    /// HTTP bind address (overrides TOML)
    #[arg(short, long, env = "SIMAK_BIND")]
    bind: Option<String>,

    /// development | production (overrides TOML)
    #[arg(long, env = "SIMAK_DEPLOYMENT")]
    deployment: Option<Deployment>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = config::load_toml_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    simak_common::logging::init_tracing(&toml_config.logging)?;

    info!("Starting simak-ingest (Transcript Ingestion)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let deployment = args.deployment.unwrap_or(toml_config.deployment);
    let ingest_config = &toml_config.ingest;
    ingest_config.validate()?;

    let env_key = std::env::var(ENCRYPTION_KEY_ENV).ok();
    let key = resolve_encryption_key(
        env_key.as_deref(),
        toml_config.encryption_key.as_deref(),
        deployment,
    )
    .context("Failed to resolve identity encryption key")?;

    let db_path = args
        .database
        .or_else(|| toml_config.database_path.clone())
        .unwrap_or_else(config::default_database_path);
    info!("Database: {}", db_path.display());

    let db_pool = simak_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let ctx = IngestContext::new(db_pool.clone(), &key, ingest_config);

    let workers = WorkerPool::new(ctx.clone(), WorkerOptions::from(ingest_config));
    let worker_handle = workers.start().await.context("Failed to start worker pool")?;

    let app = simak_ingest::build_router(AppState::new(&ctx));

    let bind = args
        .bind
        .or_else(|| toml_config.bind_address.clone())
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    worker_handle.shutdown().await;
    db_pool.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
