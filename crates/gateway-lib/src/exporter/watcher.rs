//! Periodic refresh of the exporter's service snapshot

use super::{Exporter, FunctionLister};
use crate::health::{components, HealthRegistry};
use crate::observability::StructuredLogger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Polls the provider on a fixed interval and swaps the result into the
/// exporter
pub struct ServiceWatcher {
    exporter: Arc<Exporter>,
    lister: Arc<dyn FunctionLister>,
    /// Listed when the provider has no namespaces
    default_namespace: String,
    interval: Duration,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl ServiceWatcher {
    pub fn new(
        exporter: Arc<Exporter>,
        lister: Arc<dyn FunctionLister>,
        default_namespace: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            exporter,
            lister,
            default_namespace: default_namespace.into(),
            interval,
            health: None,
            logger: StructuredLogger::new("service_watcher"),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting service watcher"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down service watcher");
                    break;
                }
            }
        }
    }

    /// Refresh the snapshot once.
    ///
    /// Returns the number of services stored, or `None` when the snapshot
    /// was left as it was.
    pub async fn tick(&self) -> Option<usize> {
        let mut failures = Vec::new();

        let namespaces = match self.lister.list_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                warn!(error = %e, "Unable to list namespaces");
                failures.push(format!("namespaces: {e}"));
                Vec::new()
            }
        };

        if namespaces.is_empty() {
            return match self.lister.list_functions(&self.default_namespace).await {
                Ok(services) => {
                    let count = services.len();
                    self.exporter.replace_services(services).await;
                    self.logger.log_snapshot_replaced(count, 0, 0);
                    self.report(&failures, false).await;
                    Some(count)
                }
                Err(e) => {
                    warn!(
                        namespace = %self.default_namespace,
                        error = %e,
                        "Unable to list functions, keeping previous snapshot"
                    );
                    failures.push(format!("{}: {}", self.default_namespace, e));
                    self.report(&failures, true).await;
                    None
                }
            };
        }

        let mut services = Vec::new();
        for namespace in &namespaces {
            match self.lister.list_functions(namespace).await {
                Ok(found) => services.extend(found),
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Unable to list functions");
                    failures.push(format!("{namespace}: {e}"));
                }
            }
        }

        let count = services.len();
        self.exporter.replace_services(services).await;
        self.logger
            .log_snapshot_replaced(count, namespaces.len(), failures.len());
        self.report(&failures, failures.len() == namespaces.len()).await;

        Some(count)
    }

    /// `unreachable` marks a tick in which no listing call succeeded
    async fn report(&self, failures: &[String], unreachable: bool) {
        let Some(health) = &self.health else {
            return;
        };
        if unreachable {
            health
                .set_unhealthy(components::SERVICE_WATCHER, failures.join("; "))
                .await;
        } else {
            health
                .report(components::SERVICE_WATCHER, failures.len(), failures.join("; "))
                .await;
        }
    }
}
