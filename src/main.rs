use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use s3_probe::config::{Config, LogFormat};
use s3_probe::controller::{Metrics, Watcher};
use s3_probe::discovery::ConsulRegistry;
use s3_probe::rest_api;
use s3_probe::storage::S3StoreFactory;

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("s3_probe=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format);
    config.validate().context("invalid configuration")?;

    info!("Starting s3-probe v{}", env!("CARGO_PKG_VERSION"));

    let mut registry = Registry::default();
    let metrics = Arc::new(Metrics::register(&mut registry));
    let registry = Arc::new(registry);

    let services = ConsulRegistry::new(&config.consul_addr, &config.tag, &config.gateway_tag)
        .context("cannot build Consul client")?;
    let stores = S3StoreFactory::new(
        &config.s3_access_key,
        &config.s3_secret_key,
        &config.s3_region,
    );

    let listen_address = config.listen_address;
    let server = tokio::spawn(async move {
        if let Err(e) = rest_api::run_server(listen_address, registry).await {
            error!("Metrics server stopped: {}", e);
        }
    });

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt, shutting down"),
            Err(e) => error!("Cannot listen for interrupt: {}", e),
        }
        signal.cancel();
    });

    let mut watcher = Watcher::new(
        Arc::new(services),
        Arc::new(stores),
        config.probe_settings(),
        metrics,
    );
    watcher.watch(config.interval, shutdown).await;

    server.abort();
    info!("s3-probe stopped");
    Ok(())
}
