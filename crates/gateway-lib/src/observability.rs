//! Observability infrastructure for the gateway
//!
//! Provides:
//! - The gateway's Prometheus metric vectors and their one-time registration
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use tracing::{info, warn};

/// Buckets for per-function request durations (in seconds)
const REQUEST_BUCKETS: &[f64] = &[0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 15.0];

/// Metric vectors exposed on the scrape endpoint
#[derive(Clone)]
pub struct MetricOptions {
    pub functions_histogram: HistogramVec,
    pub function_invocation: CounterVec,
    pub function_invocation_started: CounterVec,
    pub service_replicas: GaugeVec,
    pub function_request_histogram: HistogramVec,
    pub pod_cpu_usage_seconds_total: GaugeVec,
    pub pod_memory_working_set_bytes: GaugeVec,
}

impl MetricOptions {
    /// Build the metric vectors. Nothing is registered yet.
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            functions_histogram: HistogramVec::new(
                HistogramOpts::new("gateway_functions_seconds", "Function time taken"),
                &["function_name", "code"],
            )?,

            function_invocation: CounterVec::new(
                Opts::new("invocation_total", "Function metrics")
                    .namespace("gateway")
                    .subsystem("function"),
                &["function_name", "code"],
            )?,

            function_invocation_started: CounterVec::new(
                Opts::new(
                    "invocation_started",
                    "The total number of function HTTP requests started.",
                )
                .namespace("gateway")
                .subsystem("function"),
                &["function_name"],
            )?,

            service_replicas: GaugeVec::new(
                Opts::new("service_count", "Current count of replicas for function")
                    .namespace("gateway"),
                &["function_name"],
            )?,

            function_request_histogram: HistogramVec::new(
                HistogramOpts::new("gateway_function_request_seconds", "Function request time taken")
                    .buckets(REQUEST_BUCKETS.to_vec()),
                &["function_name"],
            )?,

            pod_cpu_usage_seconds_total: GaugeVec::new(
                Opts::new(
                    "cpu_usage_seconds_total",
                    "CPU seconds consumed by all the replicas of a given function.",
                )
                .subsystem("pod"),
                &["function_name"],
            )?,

            pod_memory_working_set_bytes: GaugeVec::new(
                Opts::new(
                    "memory_working_set_bytes",
                    "Bytes of RAM consumed by all the replicas of a given function",
                )
                .subsystem("pod"),
                &["function_name"],
            )?,
        })
    }

    fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.function_invocation.clone()),
            Box::new(self.functions_histogram.clone()),
            Box::new(self.service_replicas.clone()),
            Box::new(self.function_invocation_started.clone()),
            Box::new(self.function_request_histogram.clone()),
            Box::new(self.pod_cpu_usage_seconds_total.clone()),
            Box::new(self.pod_memory_working_set_bytes.clone()),
        ]
    }

    /// Register every vector with `registry`.
    ///
    /// Vectors that are already registered are skipped, so calling this
    /// again with the same registry does nothing.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        for collector in self.collectors() {
            match registry.register(collector) {
                Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Descriptors of every vector
    pub fn descriptors(&self) -> Vec<Desc> {
        let collectors = self.collectors();
        let mut descs = Vec::new();
        for collector in &collectors {
            descs.extend(collector.desc().into_iter().cloned());
        }
        descs
    }
}

/// The gateway's metric vectors together with the registry they live in
///
/// Built once by the process bootstrap and handed to the exporter.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    options: MetricOptions,
}

impl GatewayMetrics {
    /// Create the metric vectors and register them in a fresh registry
    pub fn init() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let options = MetricOptions::new()?;
        options.register(&registry)?;
        Ok(Self { registry, options })
    }

    pub fn options(&self) -> &MetricOptions {
        &self.options
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current value of every registered family with at least one series
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }
}

/// Structured logger for gateway lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Log gateway startup
    pub fn log_startup(&self, version: &str, port: u16) {
        info!(
            event = "gateway_started",
            component = %self.component,
            version = %version,
            port = port,
            "Gateway started"
        );
    }

    /// Log gateway shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "gateway_shutdown",
            component = %self.component,
            reason = %reason,
            "Gateway shutting down"
        );
    }

    /// Log a watcher tick that replaced the exporter snapshot
    pub fn log_snapshot_replaced(&self, services: usize, namespaces: usize, failures: usize) {
        if failures == 0 {
            info!(
                event = "snapshot_replaced",
                component = %self.component,
                services = services,
                namespaces = namespaces,
                "Service snapshot refreshed"
            );
        } else {
            warn!(
                event = "snapshot_replaced",
                component = %self.component,
                services = services,
                namespaces = namespaces,
                failures = failures,
                "Service snapshot refreshed with missing namespaces"
            );
        }
    }
}
