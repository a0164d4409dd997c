//! HTTP client for the provider's namespace and function listings

use crate::models::FunctionStatus;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default timeout for a single provider call
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid provider URL: {0}")]
    InvalidUrl(String),

    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("error unmarshalling response: {body}, error: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

/// Source of namespaces and per-namespace function lists
#[async_trait]
pub trait FunctionLister: Send + Sync {
    /// Namespaces known to the provider. Providers without namespace
    /// support return an empty list.
    async fn list_namespaces(&self) -> Result<Vec<String>, ProviderError>;

    /// Functions deployed in `namespace`; an empty namespace means the
    /// provider's default.
    async fn list_functions(&self, namespace: &str) -> Result<Vec<FunctionStatus>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct BasicAuthCredentials {
    pub user: String,
    pub password: String,
}

/// Raw status and body of a provider call
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: String,
}

/// Calls `{base}/system/namespaces` and `{base}/system/functions`
#[derive(Debug, Clone)]
pub struct ProviderClient {
    base_url: Url,
    credentials: Option<BasicAuthCredentials>,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(base_url: &str) -> Result<Self, ProviderError> {
        let base_url = Url::parse(base_url).map_err(|e| ProviderError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ProviderError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            base_url,
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_credentials(mut self, credentials: BasicAuthCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `path` appended to the base URL's own path
    fn endpoint(&self, path: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(path);
        Ok(url)
    }

    /// GET with a fresh, non-pooling client
    fn get(&self, url: Url) -> Result<RequestBuilder, ProviderError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .build()?;

        let request = client.get(url);
        Ok(match &self.credentials {
            Some(credentials) => request.basic_auth(&credentials.user, Some(&credentials.password)),
            None => request,
        })
    }

    /// Fetch the function listing without interpreting it
    pub async fn fetch_function_listing(
        &self,
        namespace: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut url = self.endpoint(&["system", "functions"])?;
        if let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) {
            url.query_pairs_mut().append_pair("namespace", namespace);
        }

        debug!(url = %url, "Listing functions from provider");
        let response = self.get(url)?.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(ProviderResponse { status, body })
    }
}

fn decode<T: DeserializeOwned>(response: ProviderResponse) -> Result<T, ProviderError> {
    if !(200..300).contains(&response.status) {
        return Err(ProviderError::Status {
            status: response.status,
            body: response.body,
        });
    }

    serde_json::from_str(&response.body).map_err(|source| ProviderError::Decode {
        source,
        body: response.body,
    })
}

#[async_trait]
impl FunctionLister for ProviderClient {
    async fn list_namespaces(&self) -> Result<Vec<String>, ProviderError> {
        let url = self.endpoint(&["system", "namespaces"])?;
        let response = self.get(url)?.send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let status = response.status().as_u16();
        let body = response.text().await?;
        decode(ProviderResponse { status, body })
    }

    async fn list_functions(&self, namespace: &str) -> Result<Vec<FunctionStatus>, ProviderError> {
        decode(self.fetch_function_listing(Some(namespace)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_list_namespaces() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/system/namespaces")
            .with_status(200)
            .with_body(r#"["openfaas-fn","staging"]"#)
            .create_async()
            .await;

        let client = ProviderClient::new(&server.url()).unwrap();
        let namespaces = client.list_namespaces().await.unwrap();

        assert_eq!(namespaces, vec!["openfaas-fn", "staging"]);
    }

    #[tokio::test]
    async fn test_list_namespaces_not_found_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/system/namespaces")
            .with_status(404)
            .with_body("404 page not found")
            .create_async()
            .await;

        let client = ProviderClient::new(&server.url()).unwrap();

        assert!(client.list_namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_functions_sends_namespace_and_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/gateway/system/functions")
            .match_query(Matcher::UrlEncoded("namespace".into(), "staging".into()))
            .match_header("authorization", "Basic YWRtaW46c2VjcmV0")
            .with_status(200)
            .with_body(r#"[{"name":"fn1","namespace":"staging","replicas":2}]"#)
            .create_async()
            .await;

        let client = ProviderClient::new(&format!("{}/gateway", server.url()))
            .unwrap()
            .with_credentials(BasicAuthCredentials {
                user: "admin".to_string(),
                password: "secret".to_string(),
            });
        let functions = client.list_functions("staging").await.unwrap();

        mock.assert_async().await;
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].replicas, 2);
    }

    #[tokio::test]
    async fn test_list_functions_without_namespace() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/system/functions")
            .match_query(Matcher::Missing)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = ProviderClient::new(&server.url()).unwrap();

        assert!(client.list_functions("").await.unwrap().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_functions_invalid_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/system/functions")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = ProviderClient::new(&server.url()).unwrap();
        let err = client.list_functions("ns1").await.unwrap_err();

        assert!(matches!(err, ProviderError::Decode { ref body, .. } if body == "not json"));
    }

    #[tokio::test]
    async fn test_fetch_function_listing_keeps_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/system/functions")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("boom")
            .create_async()
            .await;

        let client = ProviderClient::new(&server.url()).unwrap();
        let response = client.fetch_function_listing(None).await.unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.body, "boom");
        assert!(matches!(
            client.list_functions("").await,
            Err(ProviderError::Status { status: 503, .. })
        ));
    }

    #[test]
    fn test_rejects_non_base_url() {
        assert!(matches!(
            ProviderClient::new("mailto:ops@example.com"),
            Err(ProviderError::InvalidUrl(_))
        ));
        assert!(ProviderClient::new("not a url").is_err());
    }
}
