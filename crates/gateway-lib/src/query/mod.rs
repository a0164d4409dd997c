//! Metrics backend queries
//!
//! The gateway only ever asks the backend for instant vectors. Queries are
//! built from fixed PromQL templates and sent through a
//! [`MetricsQueryFetcher`]; failures are absorbed at [`fetch_or_empty`] so
//! the join functions never see an error.

mod prometheus_api;

pub use prometheus_api::PrometheusQuery;

pub use async_trait::async_trait;

use crate::models::VectorQueryResponse;
use tracing::warn;

/// Errors returned by a metrics backend query
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("metrics backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metrics backend responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unable to decode metrics backend response: {source}, body: {body}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },

    #[error("metrics backend query failed ({error_type}): {error}")]
    Backend { error_type: String, error: String },
}

/// Source of instant-vector query results
#[async_trait]
pub trait MetricsQueryFetcher: Send + Sync {
    /// Run a single instant query. One round-trip, no retry.
    async fn fetch(&self, query: &str) -> Result<VectorQueryResponse, QueryError>;
}

/// Run `query`, logging any failure and substituting an empty result.
pub async fn fetch_or_empty(
    fetcher: &dyn MetricsQueryFetcher,
    query: &str,
    family: &str,
) -> VectorQueryResponse {
    match fetcher.fetch(query).await {
        Ok(response) => response,
        Err(e) => {
            warn!(family = %family, query = %query, error = %e, "Error querying metrics backend");
            VectorQueryResponse::default()
        }
    }
}

/// Namespace that holds function workloads when none is configured
pub const DEFAULT_FUNCTION_NAMESPACE: &str = "openfaas-fn";

/// PromQL templates used by the gateway
#[derive(Debug, Clone)]
pub struct QueryTemplates {
    /// Namespace the CPU and memory queries are pinned to
    function_namespace: String,
}

impl Default for QueryTemplates {
    fn default() -> Self {
        Self::new(DEFAULT_FUNCTION_NAMESPACE)
    }
}

impl QueryTemplates {
    pub fn new(function_namespace: impl Into<String>) -> Self {
        Self {
            function_namespace: function_namespace.into(),
        }
    }

    pub fn function_namespace(&self) -> &str {
        &self.function_namespace
    }

    /// Invocation totals for functions whose name ends in `.{namespace}`
    pub fn invocations(&self, namespace: &str) -> String {
        format!(
            r#"sum(gateway_function_invocation_total{{function_name=~".*.{}"}}) by (function_name)"#,
            namespace
        )
    }

    /// CPU seconds per container in the function namespace
    pub fn cpu(&self) -> String {
        format!(
            r#"sum by(container, namespace) (container_cpu_usage_seconds_total{{image!="",namespace="{}", container!="POD"}})"#,
            self.function_namespace
        )
    }

    /// Working set bytes per container in the function namespace
    pub fn memory(&self) -> String {
        format!(
            r#"sum by(container, namespace) (container_memory_working_set_bytes{{image!="",namespace="{}", container!="POD"}})"#,
            self.function_namespace
        )
    }

    /// Mean request duration per function, across every namespace
    pub fn average_latency(&self) -> String {
        "sum by (function_name) (gateway_function_request_seconds_sum / gateway_function_request_seconds_count)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingFetcher;

    #[async_trait]
    impl MetricsQueryFetcher for FailingFetcher {
        async fn fetch(&self, _query: &str) -> Result<VectorQueryResponse, QueryError> {
            Err(QueryError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_fetch_or_empty_absorbs_errors() {
        let response = fetch_or_empty(&FailingFetcher, "up", "test").await;
        assert!(response.is_empty());
    }

    #[test]
    fn test_invocation_query_is_namespace_scoped() {
        let templates = QueryTemplates::default();
        assert_eq!(
            templates.invocations("staging"),
            r#"sum(gateway_function_invocation_total{function_name=~".*.staging"}) by (function_name)"#
        );
    }

    #[test]
    fn test_usage_queries_use_function_namespace() {
        let templates = QueryTemplates::new("fn-prod");
        assert!(templates.cpu().contains(r#"namespace="fn-prod""#));
        assert!(templates.memory().contains("container_memory_working_set_bytes"));
        assert!(!templates.average_latency().contains("namespace"));
    }
}
