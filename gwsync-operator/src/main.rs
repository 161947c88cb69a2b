use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gwsync_client::HttpBackendProvider;
use gwsync_core::{MemoryStore, ResourceStore, reconcilers};
use gwsync_operator::rest::{AppState, create_router};
use gwsync_operator::{Args, Controller, OperatorAuditLogger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("gwsync_operator=info".parse()?)
                .add_directive("gwsync_core=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let env = args.environment();

    info!(
        "Starting gwsync-operator - mode: {}, control plane: {}, REST: {}",
        env.mode(),
        env.url.as_deref().unwrap_or("<unset>"),
        args.listen
    );
    if env.url.is_none() {
        info!("No control plane URL configured, only context-scoped resources can be pushed");
    }

    let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::default());
    let backends = Arc::new(
        HttpBackendProvider::new(env).context("failed to set up control plane client")?,
    );
    let audit = Arc::new(OperatorAuditLogger::new());

    let controller = Arc::new(Controller::new(
        store.clone(),
        reconcilers(store.clone(), backends, args.retry_policy()),
        audit.clone(),
        args.controller_config(),
    ));

    let app_state = Arc::new(AppState { store, audit });
    let router = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!("REST API listening on {}", args.listen);

    // Create shutdown signal channel
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

    let controller_handle = controller.spawn(shutdown_tx.subscribe());

    let rest_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await
    });

    // Wait for shutdown signal
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    let _ = shutdown_tx.send(true);

    match rest_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("REST server failed: {}", e),
        Err(e) => error!("REST server task panicked: {}", e),
    }
    if let Err(e) = controller_handle.await {
        error!("Controller task panicked: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
