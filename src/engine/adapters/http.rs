use crate::engine::adapters::{Adapter, AdapterContext};
use crate::engine::error::{Result, TaskflowError};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{
    Client, Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde_json::{Map, Value, json};
use std::convert::TryFrom;
use std::str::FromStr;
use std::time::Duration;

/// Generic HTTP call for backend services.
///
/// Arguments: `{"url": "...", "method": "POST", "headers": {...}, "body": {...}}`.
/// The result is `{"status", "headers", "body"}`, with the body parsed as JSON
/// when possible. Responses with status >= 400 are errors.
pub struct HttpAdapter {
    client: Client,
}

impl HttpAdapter {
    pub fn new(timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout, using defaults: {e}");
                Client::new()
            });

        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, args: &Value) -> Result<Value> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskflowError::Deserialization("URL is required".to_string()))?;

        let method_str = args.get("method").and_then(Value::as_str).unwrap_or("GET");
        let method = Method::from_str(&method_str.to_uppercase()).map_err(|e| {
            TaskflowError::Deserialization(format!("Invalid HTTP method: {e}"))
        })?;

        let supports_body = method != Method::GET && method != Method::HEAD;

        let mut request = self.client.request(method, url);

        if let Some(headers) = args.get("headers").and_then(Value::as_object) {
            let mut header_map = HeaderMap::new();

            for (key, value) in headers {
                if let Some(value_str) = value.as_str() {
                    let header_name = HeaderName::try_from(key.as_str()).map_err(|e| {
                        TaskflowError::Deserialization(format!("Invalid header name '{key}': {e}"))
                    })?;
                    let header_value = HeaderValue::try_from(value_str).map_err(|e| {
                        TaskflowError::Deserialization(format!(
                            "Invalid header value '{value_str}': {e}"
                        ))
                    })?;
                    header_map.insert(header_name, header_value);
                }
            }

            request = request.headers(header_map);
        }

        if let Some(body) = args.get("body") {
            if supports_body {
                request = request.json(body);
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TaskflowError::http(408, format!("HTTP request timed out: {e}"))
            } else if e.is_connect() {
                TaskflowError::http(0, format!("Connection error: {e}"))
            } else {
                TaskflowError::http(
                    e.status().map_or(0, |s| s.as_u16()),
                    format!("HTTP request failed: {e}"),
                )
            }
        })?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), json!(v)))
            })
            .collect();

        let response_body = response.text().await.map_err(|e| {
            TaskflowError::http(status.as_u16(), format!("Failed to read response body: {e}"))
        })?;

        // Fall back to the raw string when the body is not JSON
        let body =
            serde_json::from_str::<Value>(&response_body).unwrap_or_else(|_| json!(response_body));

        if status.as_u16() >= 400 {
            return Err(TaskflowError::http(
                status.as_u16(),
                format!("{url} responded with {status}: {response_body}"),
            ));
        }

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        }))
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn adapter_type(&self) -> &str {
        super::builtins::HTTP_ADAPTER
    }

    async fn execute(&self, args: Value, ctx: &AdapterContext) -> Result<Value> {
        debug!("HTTP call for node {} ({})", ctx.node_key, ctx.request_id);

        tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                Err(TaskflowError::Cancelled(format!("HTTP call for node {} cancelled", ctx.node_key)))
            }
            result = self.send(&args) => result,
        }
    }
}
