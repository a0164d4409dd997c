//! Prometheus exporter for deployed functions
//!
//! The exporter keeps the latest list of functions seen by the
//! [`ServiceWatcher`] and, on every scrape, rebuilds the replica and
//! resource-usage gauges from that list and from fresh CPU/memory queries.
//!
//! ```text
//! ServiceWatcher ──tick──► Exporter::replace_services (writer)
//! GET /metrics ──────────► Exporter::collect          (reader)
//!                            ├── reset replica gauge, zero usage gauges
//!                            ├── query CPU + memory, set usage gauges
//!                            └── gather registry
//! ```

mod provider;
mod watcher;


pub use provider::{
    BasicAuthCredentials, FunctionLister, ProviderClient, ProviderError, ProviderResponse,
};
pub use watcher::ServiceWatcher;

use crate::health::{components, HealthRegistry};
use crate::models::{FunctionStatus, VectorQueryResponse};
use crate::observability::{GatewayMetrics, MetricOptions};
use crate::query::{MetricsQueryFetcher, QueryError, QueryTemplates};
use prometheus::core::Desc;
use prometheus::proto::MetricFamily;
use prometheus::GaugeVec;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Exposes function replica counts and resource usage to scrapers
pub struct Exporter {
    metrics: GatewayMetrics,
    /// Latest snapshot, swapped wholesale by the watcher
    services: RwLock<Arc<Vec<FunctionStatus>>>,
    fetcher: Arc<dyn MetricsQueryFetcher>,
    templates: QueryTemplates,
    /// Usage series written by the previous scrape. Holding the lock for
    /// the whole collect also serializes overlapping scrapes.
    usage_series: Mutex<HashSet<String>>,
    health: Option<HealthRegistry>,
}

impl Exporter {
    pub fn new(
        metrics: GatewayMetrics,
        fetcher: Arc<dyn MetricsQueryFetcher>,
        templates: QueryTemplates,
    ) -> Self {
        Self {
            metrics,
            services: RwLock::new(Arc::new(Vec::new())),
            fetcher,
            templates,
            usage_series: Mutex::new(HashSet::new()),
            health: None,
        }
    }

    /// Report metrics backend failures into `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Replace the known services
    pub async fn replace_services(&self, services: Vec<FunctionStatus>) {
        *self.services.write().await = Arc::new(services);
    }

    /// The current snapshot
    pub async fn services(&self) -> Arc<Vec<FunctionStatus>> {
        self.services.read().await.clone()
    }

    /// Descriptors of every metric the exporter emits
    pub fn describe(&self) -> Vec<Desc> {
        self.metrics.options().descriptors()
    }

    /// Refresh the gauges and return every metric family.
    ///
    /// Never fails: if the metrics backend is unavailable the usage gauges
    /// stay at zero and everything else is still returned.
    pub async fn collect(&self) -> Vec<MetricFamily> {
        let mut previous = self.usage_series.lock().await;
        let services = self.services().await;
        let options = self.metrics.options();

        options.service_replicas.reset();

        for key in previous.iter() {
            zero_usage(options, key);
        }

        let mut current = HashSet::with_capacity(services.len());
        for service in services.iter() {
            let key = service.service_key();
            options
                .service_replicas
                .with_label_values(&[key.as_str()])
                .set(service.replicas as f64);
            zero_usage(options, &key);
            current.insert(key);
        }

        self.refresh_usage(&mut current).await;
        *previous = current;

        self.metrics.gather()
    }

    /// Query CPU and memory once each and set the usage gauges
    async fn refresh_usage(&self, series: &mut HashSet<String>) {
        let cpu_query = self.templates.cpu();
        let memory_query = self.templates.memory();
        let (cpu, memory) = tokio::join!(
            self.fetcher.fetch(&cpu_query),
            self.fetcher.fetch(&memory_query),
        );

        let options = self.metrics.options();
        let mut failures = Vec::new();
        for (family, result, gauge) in [
            ("cpu", cpu, &options.pod_cpu_usage_seconds_total),
            ("memory", memory, &options.pod_memory_working_set_bytes),
        ] {
            if let Err(e) = set_usage(gauge, result, series) {
                warn!(
                    family = %family,
                    error = %e,
                    "Error querying metrics backend during scrape"
                );
                failures.push(format!("{family}: {e}"));
            }
        }

        if let Some(health) = &self.health {
            health
                .report(components::METRICS_BACKEND, failures.len(), failures.join("; "))
                .await;
        }
    }
}

fn zero_usage(options: &MetricOptions, key: &str) {
    options
        .pod_cpu_usage_seconds_total
        .with_label_values(&[key])
        .set(0.0);
    options
        .pod_memory_working_set_bytes
        .with_label_values(&[key])
        .set(0.0);
}

/// Set `gauge` to each sample's value, keyed by `container.namespace`
fn set_usage(
    gauge: &GaugeVec,
    result: Result<VectorQueryResponse, QueryError>,
    series: &mut HashSet<String>,
) -> Result<(), QueryError> {
    let response = result?;
    for sample in response.samples() {
        let Some(value) = sample.parsed_value() else {
            continue;
        };
        let key = format!("{}.{}", sample.metric.container, sample.metric.namespace);
        debug!(series = %key, value = value, "Setting usage gauge");
        gauge.with_label_values(&[key.as_str()]).set(value);
        series.insert(key);
    }
    Ok(())
}
