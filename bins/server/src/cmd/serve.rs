use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ingest_api::WriteSink;
use pipeline::{DeviceRegistry, IngestContext, Ingestor, spawn_ingestor};
use storage_influxdb::InfluxDbSink;
use storage_memory::MemorySink;
use transport_mqtt::MqttSource;

use crate::config::ServeArgs;
use crate::error::ServerError;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("ingest-server starting");

    // --- Load config ---
    let config = args.config.resolve()?;
    tracing::info!(config = %args.config.config, "loaded config");

    let registry = DeviceRegistry::load(&config.devices)?;
    tracing::info!(path = %config.devices, devices = registry.len(), "loaded device registry");
    if registry.is_empty() {
        tracing::warn!("device registry is empty, every message will be dropped");
    }

    let router = config.router();
    let ctx = Arc::new(IngestContext::new(registry, router, config.buckets.clone()));

    // --- Storage ---
    let sink: Box<dyn WriteSink> = if args.dry_run {
        tracing::info!("dry run: writes are kept in memory");
        Box::new(MemorySink::default())
    } else {
        let influx = InfluxDbSink::new(&config.influxdb)?;
        match influx.health().await {
            Ok(()) => tracing::info!(url = %influx.base_url(), "influxdb healthy"),
            Err(e) => tracing::warn!(url = %influx.base_url(), error = %e, "influxdb health check failed"),
        }
        Box::new(influx)
    };

    // --- Transport ---
    let source = MqttSource::connect(&config.mqtt).await?;
    tracing::info!(
        topic = %source.topic(),
        prefix_segments = router.prefix_segments(),
        "server ready"
    );

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    let mut handle = spawn_ingestor(Ingestor::new(ctx, sink), source, token.clone());

    tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            tracing::info!("shutting down...");
            token.cancel();

            // Drain: the current message is finished, then the loop exits.
            let drain = Duration::from_secs(config.drain_timeout_secs);
            match tokio::time::timeout(drain, &mut handle).await {
                Ok(Ok(stats)) => tracing::info!(?stats, "ingest loop drained"),
                Ok(Err(e)) => tracing::error!(error = %e, "ingest task failed"),
                Err(_) => {
                    tracing::warn!(timeout_secs = config.drain_timeout_secs, "drain timed out, aborting");
                    handle.abort();
                }
            }
        }
        joined = &mut handle => {
            match joined {
                Ok(stats) => tracing::info!(?stats, "message stream ended"),
                Err(e) => tracing::error!(error = %e, "ingest task failed"),
            }
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> Result<(), ServerError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
