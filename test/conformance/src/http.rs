//! Route client for a deployment behind a real HTTP router.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HOST;
use reqwest::Client;
use vizzini_models::{BbsError, BbsResult, RouteClient, RouteResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// GETs over HTTP with a per-client cookie jar.
///
/// With a router address, every request goes to that address and the
/// route hostname travels in the `Host` header. Without one, the hostname
/// must resolve on its own.
#[derive(Debug, Clone)]
pub struct HttpRouteClient {
    client: Client,
    router: Option<String>,
}

impl HttpRouteClient {
    pub fn new() -> BbsResult<Self> {
        Self::build(None, DEFAULT_TIMEOUT)
    }

    /// Send every request to `addr` (`host:port`).
    pub fn with_router(addr: impl Into<String>) -> BbsResult<Self> {
        Self::build(Some(addr.into()), DEFAULT_TIMEOUT)
    }

    pub fn build(router: Option<String>, timeout: Duration) -> BbsResult<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| BbsError::Fatal(format!("building http client: {e}")))?;
        Ok(Self { client, router })
    }

    fn url(&self, host: &str, path: &str) -> String {
        let authority = self.router.as_deref().unwrap_or(host);
        if path.starts_with('/') {
            format!("http://{authority}{path}")
        } else {
            format!("http://{authority}/{path}")
        }
    }
}

#[async_trait]
impl RouteClient for HttpRouteClient {
    async fn get(&self, host: &str, path: &str) -> BbsResult<RouteResponse> {
        let mut request = self.client.get(self.url(host, path));
        if self.router.is_some() {
            request = request.header(HOST, host);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BbsError::Transient(format!("GET {host}{path}: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BbsError::Transient(format!("reading body from {host}{path}: {e}")))?;

        Ok(RouteResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_routes_by_host_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/env"))
            .and(header("host", "app.vizzini.test"))
            .respond_with(ResponseTemplate::new(200).set_body_string("DAQUIRI\nPORT=8080\n"))
            .mount(&server)
            .await;

        let client = HttpRouteClient::with_router(server.address().to_string()).unwrap();
        let response = client.get("app.vizzini.test", "/env").await.unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body.starts_with("DAQUIRI"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpRouteClient::with_router(server.address().to_string()).unwrap();
        let response = client.get("missing.vizzini.test", "/").await.unwrap();

        assert_eq!(response.status, 404);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_query_string_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/env"))
            .and(wiremock::matchers::query_param("json", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"[["PORT","8080"]]"#))
            .mount(&server)
            .await;

        let client = HttpRouteClient::with_router(server.address().to_string()).unwrap();
        let response = client.get("app.vizzini.test", "/env?json=true").await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"[["PORT","8080"]]"#);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let client =
            HttpRouteClient::build(Some(addr.to_string()), Duration::from_secs(1)).unwrap();
        let err = client.get("app.vizzini.test", "/").await.unwrap_err();

        assert!(err.is_retryable());
    }

    #[test]
    fn test_url_joins_path() {
        let client = HttpRouteClient::new().unwrap();
        assert_eq!(client.url("app.test", "/index"), "http://app.test/index");
        assert_eq!(client.url("app.test", "index"), "http://app.test/index");
    }
}
