//! Gateway configuration

use anyhow::Result;
use gateway_lib::exporter::BasicAuthCredentials;
use gateway_lib::query::DEFAULT_FUNCTION_NAMESPACE;
use serde::Deserialize;
use std::time::Duration;

/// Gateway configuration, read from `GATEWAY_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Port for the listing proxy, health and metrics
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL of the function provider
    #[serde(default = "default_provider_url")]
    pub provider_url: String,

    #[serde(default = "default_prometheus_host")]
    pub prometheus_host: String,

    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,

    /// Namespace used for usage queries and when the provider lists no
    /// namespaces
    #[serde(default = "default_function_namespace")]
    pub function_namespace: String,

    /// How often the service watcher refreshes the function list
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_secs: u64,

    /// Timeout for provider and metrics backend calls
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    #[serde(default)]
    pub basic_auth_user: Option<String>,

    #[serde(default)]
    pub basic_auth_password: Option<String>,
}

fn default_port() -> u16 {
    8080
}

fn default_provider_url() -> String {
    "http://faas-provider:8081".to_string()
}

fn default_prometheus_host() -> String {
    "prometheus".to_string()
}

fn default_prometheus_port() -> u16 {
    9090
}

fn default_function_namespace() -> String {
    DEFAULT_FUNCTION_NAMESPACE.to_string()
}

fn default_scrape_interval() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    5
}

impl GatewayConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("GATEWAY").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs.max(1))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs.max(1))
    }

    /// Provider credentials, when both user and password are set
    pub fn credentials(&self) -> Option<BasicAuthCredentials> {
        match (&self.basic_auth_user, &self.basic_auth_password) {
            (Some(user), Some(password)) => Some(BasicAuthCredentials {
                user: user.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}
