use anyhow::Context;
use dockstream::{BollardGateway, Collector, CollectorConfig, JsonlSink, SledCheckpointStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dockstream=info")),
        )
        .init();

    info!("starting dockstream");

    let config = CollectorConfig::load().context("failed to load configuration")?;

    let gateway = Arc::new(
        BollardGateway::connect()
            .await
            .context("Docker daemon not reachable")?,
    );
    let sink = Arc::new(
        JsonlSink::open(&config.sink_path)
            .await
            .context("failed to open log sink")?,
    );
    let checkpoints = Arc::new(
        SledCheckpointStore::open(&config.checkpoint_path)
            .context("failed to open checkpoint store")?,
    );

    let cancel = CancellationToken::new();
    let collector = Collector::new(gateway, sink, checkpoints, &config, cancel.clone());
    collector.start().await;

    info!("collector loaded successfully");

    wait_for_shutdown().await?;
    info!("signal received, shutting down");
    cancel.cancel();

    // Give workers a moment to drain their buffers before the process exits.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    Ok(())
}

/// Block until SIGINT or SIGTERM arrives.
async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
