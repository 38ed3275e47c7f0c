use std::future::IntoFuture;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use silbo::compactor;
use silbo::config::Config;
use silbo::consistency::ConsistencyService;
use silbo::http::{AppState, create_router};
use silbo::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    silbo::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(Store::open(&config.wal_path())?);
    let compactor_store = store.clone();
    let threshold = config.compact_threshold;
    let compactor_task = tokio::spawn(async move {
        compactor::run_compactor(compactor_store, threshold).await;
    });

    let service = Arc::new(ConsistencyService::new(store.clone(), config.operation_timeout));
    let app = create_router(AppState::new(service));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("silbo listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  operation_timeout: {}ms", config.operation_timeout.as_millis());
    info!("  compact_threshold: {threshold}");
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Stop accepting on SIGTERM/ctrl-c, then give in-flight requests a grace period
    let grace = config.shutdown_grace;
    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining requests");
        let _ = stop_tx.send(true);
    });
    let drain_deadline = async move {
        if stop_rx.changed().await.is_ok() {
            tokio::time::sleep(grace).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server.into_future() => result?,
        _ = drain_deadline => tracing::warn!("drain timeout, closing remaining connections"),
    }

    compactor_task.abort();
    // Acknowledged writes are already fsynced.
    compactor::compact_if_due(&store, 1).await;
    info!("silbo stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
