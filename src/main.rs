use clap::Parser;
use solstate::config::{AppConfig, StorageBackend};
use solstate::routes::build_router;
use solstate::state::AppState;
use solstate::storage::{self, object_store::ObjectStore};
use solstate::updater::AutoUpdater;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Parser)]
#[command(name = "solstate", about = "Data backend for the State of Solana dashboards")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Do not start the periodic data updater, regardless of config
    #[arg(long)]
    no_auto_update: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solstate=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config))?;

    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        return Err(msg.into());
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        storage = ?config.storage.backend,
        db = %config.database.path.display(),
        "starting solstate"
    );

    // SQLite backup store
    let pool = storage::sqlite::create_pool(&config.database)?;
    storage::sqlite::init_pool(&pool).await?;
    tracing::info!("database initialized");

    // Object storage
    if config.storage.backend == StorageBackend::Fs {
        tokio::fs::create_dir_all(&config.storage.local_dir).await?;
    }
    let store = ObjectStore::from_config(&config.storage)?;
    if !store.ping().await {
        tracing::warn!(backend = store.backend_name(), "object storage is not reachable yet");
    }

    let rate_limit = config.rate_limit.clone();
    let auto_update = config.auto_update.enabled && !cli.no_auto_update;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState::new(config, store, pool)?);
    if auto_update && state.updater.start() {
        tracing::info!("auto-update enabled");
    }

    let app = build_router(state.clone(), Some(&rate_limit));

    // Start server
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state.updater.clone()))
    .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(updater: Arc<AutoUpdater>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
    if let Some(timer) = updater.stop() {
        if updater.status().is_updating {
            tracing::info!("waiting for the running data update to finish");
        }
        if let Err(e) = timer.await {
            tracing::warn!(error = %e, "auto-updater task ended abnormally");
        }
    }
}
