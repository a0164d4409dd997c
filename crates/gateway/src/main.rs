//! Function gateway - metrics enrichment and Prometheus exporter
//!
//! Proxies the provider's function listing with live usage metrics joined
//! in, and exports replica and resource gauges for every deployed function.

use gateway_lib::{
    enrich::EnrichState,
    exporter::{Exporter, ProviderClient, ServiceWatcher},
    health::{components, HealthRegistry},
    observability::{GatewayMetrics, StructuredLogger},
    query::{PrometheusQuery, QueryTemplates},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting gateway");

    let config = config::GatewayConfig::load()?;
    info!(
        provider_url = %config.provider_url,
        prometheus = %format!("{}:{}", config.prometheus_host, config.prometheus_port),
        function_namespace = %config.function_namespace,
        "Gateway configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SERVICE_WATCHER).await;
    health_registry.register(components::METRICS_BACKEND).await;

    let metrics = GatewayMetrics::init().context("registering gateway metrics")?;

    let logger = StructuredLogger::new("gateway");
    logger.log_startup(GATEWAY_VERSION, config.port);

    let fetcher = Arc::new(
        PrometheusQuery::new(config.prometheus_host.clone(), config.prometheus_port)
            .with_timeout(config.upstream_timeout()),
    );
    let templates = QueryTemplates::new(config.function_namespace.clone());

    let exporter = Arc::new(
        Exporter::new(metrics, fetcher.clone(), templates.clone())
            .with_health(health_registry.clone()),
    );

    let mut provider = ProviderClient::new(&config.provider_url)
        .context("invalid provider URL")?
        .with_timeout(config.upstream_timeout());
    if let Some(credentials) = config.credentials() {
        provider = provider.with_credentials(credentials);
    }
    let provider = Arc::new(provider);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let watcher = ServiceWatcher::new(
        exporter.clone(),
        provider.clone(),
        config.function_namespace.clone(),
        config.scrape_interval(),
    )
    .with_health(health_registry.clone());
    let watcher_handle = tokio::spawn(watcher.run(shutdown_rx));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        exporter,
        provider,
        EnrichState::new(fetcher, templates),
    ));

    // Mark gateway as ready after initialization
    health_registry.set_ready(true).await;

    let mut api_handle = tokio::spawn(api::serve(config.port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = &mut api_handle => {
            match result {
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(());
    let _ = watcher_handle.await;
    api_handle.abort();

    Ok(())
}
