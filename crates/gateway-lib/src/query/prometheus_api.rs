//! HTTP client for the Prometheus instant query API

use super::{async_trait, MetricsQueryFetcher, QueryError};
use crate::models::VectorQueryResponse;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Default timeout for a single query round-trip
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Queries `http://{host}:{port}/api/v1/query`
#[derive(Debug, Clone)]
pub struct PrometheusQuery {
    host: String,
    port: u16,
    timeout: Duration,
}

impl PrometheusQuery {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("http://{}:{}/api/v1/query", self.host, self.port)
    }

    /// The backend's series membership changes often, so every call gets
    /// its own client with idle pooling disabled.
    fn client(&self) -> Result<Client, QueryError> {
        Ok(Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .build()?)
    }
}

#[async_trait]
impl MetricsQueryFetcher for PrometheusQuery {
    async fn fetch(&self, query: &str) -> Result<VectorQueryResponse, QueryError> {
        debug!(query = %query, "Querying metrics backend");

        let response = self
            .client()?
            .get(self.endpoint())
            .query(&[("query", query)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: VectorQueryResponse =
            serde_json::from_str(&body).map_err(|source| QueryError::Decode { source, body })?;

        if parsed.status != "success" {
            return Err(QueryError::Backend {
                error_type: parsed.error_type.unwrap_or_default(),
                error: parsed.error.unwrap_or_default(),
            });
        }

        Ok(parsed)
    }
}
