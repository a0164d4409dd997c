//! Enrichment of function listings with live metrics
//!
//! [`add_metrics`] is an axum middleware: it runs the wrapped listing
//! handler to completion, inspects its response and, when the provider
//! answered `200 OK` with a list of functions, rewrites the body with
//! invocation counts, average latency and resource usage joined in.
//!
//! Only the invocation query is scoped to a namespace (the namespace of the
//! first listed function). CPU and memory are read for the configured
//! function namespace and latency for every namespace, whatever namespace
//! was listed.

use crate::join::{
    merge_average_latency, merge_cpu_usage, merge_invocation_counts, merge_memory_usage,
};
use crate::models::FunctionStatus;
use crate::query::{fetch_or_empty, MetricsQueryFetcher, QueryTemplates};
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::sync::Arc;
use tracing::{error, warn};

/// Largest upstream body the middleware will buffer
const MAX_UPSTREAM_BODY_BYTES: usize = 32 * 1024 * 1024;

pub const PARSE_ERROR_MESSAGE: &str = "unable to parse list of functions from provider";
pub const SERIALIZE_ERROR_MESSAGE: &str = "Error writing response after adding metrics";
pub const BODY_TOO_LARGE_MESSAGE: &str = "list of functions from provider is too large";

/// State shared by every enriched request
#[derive(Clone)]
pub struct EnrichState {
    fetcher: Arc<dyn MetricsQueryFetcher>,
    templates: QueryTemplates,
    body_limit: usize,
}

impl EnrichState {
    pub fn new(fetcher: Arc<dyn MetricsQueryFetcher>, templates: QueryTemplates) -> Self {
        Self {
            fetcher,
            templates,
            body_limit: MAX_UPSTREAM_BODY_BYTES,
        }
    }

    /// Largest upstream body to buffer, in bytes
    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    /// Turn a captured upstream listing response into the client response
    pub async fn enrich_response(&self, upstream: Response) -> Response {
        let (parts, body) = upstream.into_parts();

        let body = match Limited::new(body, self.body_limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                error!(limit = self.body_limit, "Upstream listing exceeds body limit");
                return (StatusCode::BAD_GATEWAY, BODY_TOO_LARGE_MESSAGE).into_response();
            }
            Err(e) => {
                warn!(error = %e, "Upstream call had empty body");
                return Response::default();
            }
        };

        if parts.status != StatusCode::OK {
            warn!(
                status = parts.status.as_u16(),
                body = %String::from_utf8_lossy(&body),
                "List functions responded with error"
            );
            return (
                parts.status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response();
        }

        let listed: Vec<FunctionStatus> = match serde_json::from_slice(&body) {
            Ok(listed) => listed,
            Err(e) => {
                error!(
                    error = %e,
                    body = %String::from_utf8_lossy(&body),
                    "Metrics upstream error"
                );
                return (StatusCode::INTERNAL_SERVER_ERROR, PARSE_ERROR_MESSAGE).into_response();
            }
        };

        let mut functions: Vec<FunctionStatus> =
            listed.iter().map(FunctionStatus::with_zeroed_metrics).collect();
        self.mix_metrics(&mut functions).await;

        match serde_json::to_vec(&functions) {
            Ok(bytes) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                bytes,
            )
                .into_response(),
            Err(e) => {
                error!(error = %e, "Error serializing functions");
                (StatusCode::INTERNAL_SERVER_ERROR, SERIALIZE_ERROR_MESSAGE).into_response()
            }
        }
    }

    /// Query every metric family and join the results onto `functions`.
    ///
    /// A failed query contributes nothing; the remaining families are
    /// still joined.
    pub async fn mix_metrics(&self, functions: &mut [FunctionStatus]) {
        let Some(first) = functions.first() else {
            return;
        };

        let invocations_query = self.templates.invocations(&first.namespace);
        let cpu_query = self.templates.cpu();
        let memory_query = self.templates.memory();
        let latency_query = self.templates.average_latency();

        let fetcher = self.fetcher.as_ref();
        let (invocations, cpu, memory, latency) = tokio::join!(
            fetch_or_empty(fetcher, &invocations_query, "invocations"),
            fetch_or_empty(fetcher, &cpu_query, "cpu"),
            fetch_or_empty(fetcher, &memory_query, "memory"),
            fetch_or_empty(fetcher, &latency_query, "latency"),
        );

        merge_invocation_counts(functions, &invocations);
        merge_cpu_usage(functions, &cpu);
        merge_memory_usage(functions, &memory);
        merge_average_latency(functions, &latency);
    }
}

/// Middleware that enriches the wrapped listing handler's response
pub async fn add_metrics(State(state): State<EnrichState>, request: Request, next: Next) -> Response {
    let upstream = next.run(request).await;
    state.enrich_response(upstream).await
}

/// Wrap a listing route so its responses carry live metrics
pub fn enrich<S>(upstream: MethodRouter<S>, state: EnrichState) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    upstream.layer(from_fn_with_state(state, add_metrics))
}
