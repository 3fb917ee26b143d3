use dedup_fs::background;
use dedup_fs::config::AppConfig;
use dedup_fs::routes;
use dedup_fs::services::storage::StorageManager;
use dedup_fs::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    tracing::info!("Starting dedup-fs v{}", env!("CARGO_PKG_VERSION"));

    // Boot recovery: snapshot, WAL replay, reconcile with the disk
    let boot_config = config.clone();
    let (manager, report) =
        tokio::task::spawn_blocking(move || StorageManager::open_with_report(boot_config))
            .await??;
    tracing::info!(
        files = manager.index().len(),
        snapshot_files = report.snapshot_files,
        replayed = report.replayed_entries,
        dropped_missing = report.dropped_missing,
        cleared_staging = report.cleared_staging,
        workers = config.effective_worker_count(),
        "Storage ready"
    );

    let state = AppState::new(manager);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let snapshot_handle = tokio::spawn(background::snapshot_writer::run(
        state.clone(),
        shutdown_rx,
    ));

    let app = routes::build_router(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    tracing::info!("Waiting for background tasks to finish");
    let _ = snapshot_handle.await;

    tracing::info!("Writing final snapshot");
    background::snapshot_writer::write_snapshot(&state).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
}
