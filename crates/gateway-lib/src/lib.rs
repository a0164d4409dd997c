//! Gateway library for function metrics
//!
//! This crate provides the core functionality for:
//! - Querying the metrics backend for function usage
//! - Joining query results into function listings
//! - Enriching the provider's `/system/functions` responses
//! - Exporting replica and resource gauges to Prometheus
//! - Health checks and observability

pub mod enrich;
pub mod exporter;
pub mod health;
pub mod join;
pub mod models;
pub mod observability;
pub mod query;

pub use enrich::{add_metrics, enrich, EnrichState};
pub use exporter::{Exporter, ProviderClient, ServiceWatcher};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{GatewayMetrics, MetricOptions, StructuredLogger};
pub use query::{MetricsQueryFetcher, PrometheusQuery, QueryError, QueryTemplates};
