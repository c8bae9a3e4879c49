/// HTTP backend
///
/// Every call is one POST of a JSON-RPC envelope with a fixed id: the HTTP
/// response is always the matching reply, so no correlation is needed. No
/// retries happen here; startup retries cover initialization and callers
/// own resilience for everything else.
use super::{collect_tool_pages, Backend, BackendError};
use crate::config::{ServerSpec, TransportKind};
use crate::protocol::{
    call_tool_params, initialize_params, resolve_response, JsonRpcRequest, MissingResult,
    ToolDescriptor,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_ID: u64 = 1;

pub struct HttpBackend {
    name: String,
    url: String,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(name: &str, spec: &ServerSpec, timeout: Duration) -> Result<Self, BackendError> {
        if spec.url.trim().is_empty() {
            return Err(BackendError::MissingField {
                backend: name.to_string(),
                field: "url",
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (key, value) in &spec.headers {
            let header_name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| BackendError::Transport(format!("invalid header name {key}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| BackendError::Transport(format!("invalid header value for {key}: {e}")))?;
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            name: name.to_string(),
            url: spec.url.trim().to_string(),
            headers,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, envelope: &JsonRpcRequest) -> Result<reqwest::Response, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "http_backend", backend = %self.name, error = %e, "Request failed");
                BackendError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, BackendError> {
        debug!(target: "http_backend", backend = %self.name, method = %method, "POST");
        let response = self
            .post(&JsonRpcRequest::new(REQUEST_ID, method, params))
            .await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let decoded: Value = serde_json::from_slice(&body)
            .map_err(|e| BackendError::Protocol(format!("Invalid response body: {}", e)))?;
        resolve_response(decoded, MissingResult::WholeBody)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        self.rpc("initialize", initialize_params()).await?;
        // Servers commonly answer 202 with an empty body, and some reject
        // notifications outright; neither undoes a completed handshake
        if let Err(e) = self
            .post(&JsonRpcRequest::notification("notifications/initialized"))
            .await
        {
            warn!(target: "http_backend", backend = %self.name, error = %e, "initialized notification failed");
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BackendError> {
        collect_tool_pages(move |params| self.rpc("tools/list", params)).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        self.rpc("tools/call", call_tool_params(name, arguments)).await
    }

    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
