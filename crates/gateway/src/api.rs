//! HTTP API: enriched function listing, health checks and Prometheus metrics

use gateway_lib::{
    enrich::{enrich, EnrichState},
    exporter::{Exporter, ProviderClient},
    health::{ComponentStatus, HealthRegistry},
};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub exporter: Arc<Exporter>,
    pub provider: Arc<ProviderClient>,
    pub enrich: EnrichState,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        exporter: Arc<Exporter>,
        provider: Arc<ProviderClient>,
        enrich: EnrichState,
    ) -> Self {
        Self {
            health_registry,
            exporter,
            provider,
            enrich,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    namespace: Option<String>,
}

/// Proxy the provider's function listing unchanged
async fn list_functions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state
        .provider
        .fetch_function_listing(query.namespace.as_deref())
        .await
    {
        Ok(listing) => {
            let status =
                StatusCode::from_u16(listing.status).unwrap_or(StatusCode::BAD_GATEWAY);
            (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                listing.body,
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Unable to reach provider");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint, one exporter scrape per request
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let metric_families = state.exporter.collect().await;
    let mut buffer = Vec::new();

    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buffer) {
        error!(error = %e, "Unable to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/system/functions",
            enrich(get(list_functions), state.enrich.clone()),
        )
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use gateway_lib::{
        exporter::BasicAuthCredentials,
        models::{SampleLabels, VectorQueryResponse, VectorQueryResult},
        observability::GatewayMetrics,
        query::{MetricsQueryFetcher, QueryError, QueryTemplates},
    };
    use mockito::Matcher;
    use tower::ServiceExt;

    /// Answers every invocation query with one sample for `fn1.ns1`
    struct InvocationsOnly;

    #[async_trait]
    impl MetricsQueryFetcher for InvocationsOnly {
        async fn fetch(&self, query: &str) -> Result<VectorQueryResponse, QueryError> {
            if !query.contains("gateway_function_invocation_total") {
                return Ok(VectorQueryResponse::default());
            }
            Ok(VectorQueryResponse::from_samples(vec![VectorQueryResult::new(
                SampleLabels {
                    function_name: "fn1.ns1".to_string(),
                    ..Default::default()
                },
                "12",
            )]))
        }
    }

    fn app(provider_url: &str) -> Router {
        let fetcher: Arc<dyn MetricsQueryFetcher> = Arc::new(InvocationsOnly);
        let exporter = Arc::new(Exporter::new(
            GatewayMetrics::init().unwrap(),
            fetcher.clone(),
            QueryTemplates::default(),
        ));
        let provider = ProviderClient::new(provider_url)
            .unwrap()
            .with_credentials(BasicAuthCredentials {
                user: "admin".to_string(),
                password: "secret".to_string(),
            });

        create_router(Arc::new(AppState::new(
            HealthRegistry::new(),
            exporter,
            Arc::new(provider),
            EnrichState::new(fetcher, QueryTemplates::default()),
        )))
    }

    #[tokio::test]
    async fn test_listing_is_proxied_and_enriched() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/system/functions")
            .match_query(Matcher::UrlEncoded("namespace".into(), "ns1".into()))
            .match_header("authorization", "Basic YWRtaW46c2VjcmV0")
            .with_status(200)
            .with_body(r#"[{"name":"fn1","namespace":"ns1","replicas":1}]"#)
            .create_async()
            .await;

        let response = app(&server.url())
            .oneshot(
                Request::builder()
                    .uri("/system/functions?namespace=ns1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let functions: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(functions[0]["name"], "fn1");
        assert_eq!(functions[0]["invocationCount"], 12.0);
    }

    #[tokio::test]
    async fn test_provider_error_passes_through() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/system/functions")
            .with_status(404)
            .with_body("namespace not found")
            .create_async()
            .await;

        let response = app(&server.url())
            .oneshot(
                Request::builder()
                    .uri("/system/functions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"namespace not found");
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_bad_gateway() {
        let response = app("http://127.0.0.1:1")
            .oneshot(
                Request::builder()
                    .uri("/system/functions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_metrics_uses_text_format() {
        let response = app("http://127.0.0.1:1")
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            prometheus::TEXT_FORMAT
        );
    }
}
