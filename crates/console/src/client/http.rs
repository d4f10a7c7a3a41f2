use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use protocol::{
    CreateExecutionRequest, CreatedExecution, Page, RawExecutionListItem, RawExecutionStatus,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ExecutionClient, ListQuery, TransportError};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const ERROR_BODY_LIMIT: usize = 512;
static HTTP_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// REST client for the execution endpoints under `base_url`.
#[derive(Clone)]
pub struct HttpExecutionClient {
    client: Client,
    base_url: Url,
}

impl HttpExecutionClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid base url {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("base url {base_url} cannot carry a path");
        }
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Network(format!("invalid base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TransportError> {
        let request_id = HTTP_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let request = request
            .header(ACCEPT, "application/json")
            .build()
            .map_err(|err| TransportError::Network(err.to_string()))?;
        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(request_id, method = %method, url = %url, "http request start");

        let response = self.client.execute(request).await.map_err(|err| {
            tracing::debug!(
                request_id,
                timeout = err.is_timeout(),
                connect = err.is_connect(),
                error = %err,
                "http request failed"
            );
            transport_error(err)
        })?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        tracing::debug!(
            request_id,
            status = status.as_u16(),
            body_len = body.len(),
            "http request done"
        );
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }
        serde_json::from_str(&body).map_err(|err| TransportError::Decode(err.to_string()))
    }
}

#[async_trait]
impl ExecutionClient for HttpExecutionClient {
    async fn create_execution(
        &self,
        tool_name: &str,
        arguments: &Value,
        target: Option<&str>,
    ) -> Result<CreatedExecution, TransportError> {
        let payload = CreateExecutionRequest {
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            target: target.map(str::to_string),
        };
        let url = self.endpoint(&["executions"])?;
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload);
        self.send(request).await
    }

    async fn fetch_execution(&self, id: &str) -> Result<RawExecutionStatus, TransportError> {
        let url = self.endpoint(&["executions", id])?;
        self.send(self.client.get(url)).await
    }

    async fn fetch_executions_page(
        &self,
        query: &ListQuery,
    ) -> Result<Page<RawExecutionListItem>, TransportError> {
        let url = self.endpoint(&["executions"])?;
        let request = self.client.get(url).query(&query.to_pairs());
        self.send(request).await
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= ERROR_BODY_LIMIT {
        return trimmed.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}/api")
    }

    fn client(base_url: &str) -> HttpExecutionClient {
        HttpExecutionClient::new(base_url, Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn creates_and_fetches_execution() {
        let router = Router::new()
            .route(
                "/api/executions",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    Json(json!({
                        "items": [{ "id": "e1", "status": params.get("status").cloned().unwrap_or_default() }],
                        "total": 1,
                        "page": params.get("page").and_then(|p| p.parse::<u32>().ok()).unwrap_or(0),
                        "size": 20
                    }))
                })
                .post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["toolName"], "system.get_uptime");
                    assert_eq!(body["target"], "web-01");
                    Json(json!({ "executionId": "e1" }))
                }),
            )
            .route(
                "/api/executions/:id",
                get(|Path(id): Path<String>| async move {
                    Json(json!({ "id": id, "status": "SUCCESS", "exitCode": 0, "stdout": "up 3 days" }))
                }),
            );
        let base_url = serve(router).await;
        let client = client(&base_url);

        let created = client
            .create_execution("system.get_uptime", &json!({}), Some("web-01"))
            .await
            .expect("create");
        assert_eq!(created.execution_id, "e1");

        let raw = client.fetch_execution("e1").await.expect("fetch");
        assert_eq!(raw.status, "SUCCESS");
        assert_eq!(raw.exit_code, Some(0));
        assert_eq!(raw.stdout.as_deref(), Some("up 3 days"));

        let query = ListQuery {
            filters: [("status".to_string(), "RUNNING".to_string())].into(),
            page: 3,
            size: 20,
            sort: None,
        };
        let page = client.fetch_executions_page(&query).await.expect("page");
        assert_eq!(page.items[0].status, "RUNNING");
        assert_eq!(page.page, 3);
    }

    #[tokio::test]
    async fn maps_server_errors_to_status() {
        let router = Router::new().route(
            "/api/executions/:id",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "backend down") }),
        );
        let base_url = serve(router).await;
        let err = client(&base_url).fetch_execution("e1").await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 503,
                message: "backend down".to_string(),
            }
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn maps_garbage_body_to_decode_error() {
        let router = Router::new().route("/api/executions/:id", get(|| async { "<html>" }));
        let base_url = serve(router).await;
        let err = client(&base_url).fetch_execution("e1").await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let err = client(&format!("http://{addr}"))
            .fetch_execution("e1")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn endpoint_escapes_ids() {
        let client = client("http://localhost:8080/api/");
        let url = client.endpoint(&["executions", "a/b"]).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8080/api/executions/a%2Fb");
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(HttpExecutionClient::new("not a url", Duration::from_secs(1)).is_err());
    }
}
