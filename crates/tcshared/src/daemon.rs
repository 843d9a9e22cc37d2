//! Daemon lifecycle: storage, listeners, systemd notify, shutdown

use anyhow::{Context, Result};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tcshare_core::config::TcshareConfig;
use tcshare_storage::{FileStore, StoreOptions};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::http::AppState;
use crate::metrics::Metrics;
use crate::upload::SessionOptions;

pub async fn run(config: TcshareConfig) -> Result<()> {
    info!("daemon starting");

    config
        .transfer
        .validate()
        .context("invalid [transfer] configuration")?;

    let store = FileStore::open(
        &config.daemon.storage_dir,
        StoreOptions::from_config(&config.daemon, &config.transfer),
    )
    .await
    .with_context(|| format!("opening storage dir {}", config.daemon.storage_dir.display()))?;

    if !store.is_writable().await {
        warn!(root = %store.root().display(), "storage dir is not writable, uploads will fail");
    }

    let mut registry = Registry::default();
    let metrics = Arc::new(Metrics::register(&mut registry));
    let state = AppState {
        store: store.clone(),
        metrics: metrics.clone(),
        registry: Arc::new(registry),
    };

    let http_listener = TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("binding HTTP listener {}", config.daemon.listen))?;
    let upload_listener = TcpListener::bind(&config.daemon.upload_listen)
        .await
        .with_context(|| format!("binding upload listener {}", config.daemon.upload_listen))?;

    let shutdown = CancellationToken::new();
    let uploads = tokio::spawn(crate::upload::serve(
        upload_listener,
        store,
        metrics,
        SessionOptions::from_config(&config),
        shutdown.clone(),
    ));

    info!(
        http = %config.daemon.listen,
        upload = %config.daemon.upload_listen,
        metrics = config.daemon.metrics,
        "tcshared: listening"
    );
    notify_ready();

    let app = crate::http::router(state, config.daemon.metrics);
    let stop = shutdown.clone();
    axum::serve(http_listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {e}");
            }
            info!("shutdown requested");
            stop.cancel();
        })
        .await
        .context("HTTP server")?;

    shutdown.cancel();
    if let Err(e) = uploads.await {
        warn!("upload listener task failed: {e}");
    }
    info!("daemon stopped");
    Ok(())
}

fn notify_ready() {
    // sd_notify(READY=1) when running under systemd; no-op without $NOTIFY_SOCKET
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
