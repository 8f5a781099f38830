//! Legacy SSE MCP client
//!
//! Implements the legacy MCP SSE protocol:
//! 1. GET the SSE endpoint and hold the event stream open
//! 2. The server sends an `endpoint` event with the message URL
//! 3. JSON-RPC requests are POSTed to that URL
//! 4. Responses and notifications arrive on the SSE stream
//!
//! SSE upstreams are assumed session-less; no session id is surfaced.

use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::constants::{
    SUPPORTED_PROTOCOL_VERSION, UPSTREAM_CONNECT_TIMEOUT_SECS,
};
use crate::error::UpstreamError;
use crate::model::{CallToolResult, McpToolSpec};
use crate::{GatewayError, Result};

use super::streamable_http::sse_event_data;
use super::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, UpstreamAuth, parse_call_tool_result,
    parse_tools_page,
};

/// Legacy SSE MCP client for one upstream server
pub struct SseClient {
    client: reqwest::Client,
    /// Message URL discovered from the `endpoint` event
    post_url: String,
    auth: UpstreamAuth,
    responses: Mutex<mpsc::UnboundedReceiver<JsonRpcResponse>>,
    cancel: CancellationToken,
    next_id: AtomicI64,
}

impl SseClient {
    /// Open the SSE stream and wait for the server to announce its message
    /// endpoint
    pub async fn connect(client: reqwest::Client, url: String, auth: UpstreamAuth) -> Result<Self> {
        let request = auth.apply(
            client
                .get(&url)
                .header(reqwest::header::ACCEPT, "text/event-stream"),
        );
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(UpstreamError::Transient(e.to_string())))?;
        if !response.status().is_success() {
            return Err(GatewayError::Upstream(UpstreamError::Permanent(format!(
                "SSE endpoint returned {}",
                response.status()
            ))));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_stream_worker(
            response,
            endpoint_tx,
            response_tx,
            cancel.clone(),
        ));

        let endpoint = tokio::time::timeout(
            Duration::from_secs(UPSTREAM_CONNECT_TIMEOUT_SECS),
            endpoint_rx,
        )
        .await
        .map_err(|_| {
            GatewayError::Upstream(UpstreamError::Transient(
                "timed out waiting for SSE endpoint event".to_string(),
            ))
        })?
        .map_err(|_| {
            GatewayError::Upstream(UpstreamError::Permanent(
                "SSE stream closed before the endpoint event".to_string(),
            ))
        })?;

        let post_url = resolve_endpoint(&url, &endpoint)?;

        Ok(Self {
            client,
            post_url,
            auth,
            responses: Mutex::new(response_rx),
            cancel,
            next_id: AtomicI64::new(1),
        })
    }

    /// Initialize the upstream session
    pub async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": SUPPORTED_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "aci-gateway",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        self.request("initialize", params).await?;
        self.notify("notifications/initialized").await
    }

    /// List all tools, following the cursor chain
    pub async fn list_tools(&self) -> Result<Vec<McpToolSpec>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let (page, next_cursor) = parse_tools_page(result)?;
            tools.extend(page);
            match next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tools)
    }

    /// Call one tool
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> Result<CallToolResult> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        parse_call_tool_result(result)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        self.post(serde_json::to_value(&request)?).await?;

        // Requests on one client are serialized by the gateway, so the next
        // matching response on the stream belongs to us
        let mut responses = self.responses.lock().await;
        loop {
            let response = responses.recv().await.ok_or_else(|| {
                GatewayError::Upstream(UpstreamError::Transient(
                    "SSE stream closed while waiting for a response".to_string(),
                ))
            })?;
            if response.id.as_ref().and_then(Value::as_i64) != Some(id) {
                continue;
            }
            if let Some(error) = response.error {
                return Err(GatewayError::Upstream(error.into_upstream_error()));
            }
            return response.result.ok_or_else(|| {
                GatewayError::Upstream(UpstreamError::Permanent(format!(
                    "upstream returned no result for {}",
                    method
                )))
            });
        }
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0",
            method,
        };
        self.post(serde_json::to_value(&notification)?).await
    }

    async fn post(&self, body: Value) -> Result<()> {
        let request = self.auth.apply(self.client.post(&self.post_url).json(&body));
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(UpstreamError::Transient(e.to_string())))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream(UpstreamError::Permanent(format!(
                "SSE message endpoint returned {}: {}",
                status, body
            ))));
        }
        Ok(())
    }
}

impl Drop for SseClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read the SSE stream, announce the endpoint once, then forward responses
async fn run_stream_worker(
    response: reqwest::Response,
    endpoint_tx: oneshot::Sender<String>,
    response_tx: mpsc::UnboundedSender<JsonRpcResponse>,
    cancel: CancellationToken,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = stream.next() => chunk,
        };
        let Some(Ok(chunk)) = chunk else {
            break;
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some((event, rest_at)) = next_event(&buffer) {
            let event_name = event_field(&event, "event").unwrap_or_else(|| "message".to_string());
            let data = sse_event_data(&event);
            buffer.drain(..rest_at);

            match (event_name.as_str(), data) {
                ("endpoint", Some(endpoint)) => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(endpoint);
                    }
                }
                ("message", Some(data)) => {
                    if let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&data) {
                        if response_tx.send(parsed).is_err() {
                            return;
                        }
                    } else {
                        tracing::debug!("ignoring non-response SSE message");
                    }
                }
                _ => {}
            }
        }
    }
}

fn next_event(buffer: &str) -> Option<(String, usize)> {
    let lf = buffer.find("\n\n").map(|at| (at, at + 2));
    let crlf = buffer.find("\r\n\r\n").map(|at| (at, at + 4));
    let (at, end) = match (lf, crlf) {
        (Some(a), Some(b)) if b.0 < a.0 => b,
        (Some(a), _) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((buffer[..at].to_string(), end))
}

fn event_field(event: &str, field: &str) -> Option<String> {
    let prefix = format!("{}:", field);
    for line in event.lines() {
        if let Some(rest) = line.strip_prefix(&prefix) {
            return Some(rest.trim().to_string());
        }
    }
    None
}

/// Resolve a possibly-relative endpoint path against the SSE base URL
fn resolve_endpoint(base: &str, endpoint: &str) -> Result<String> {
    let base_url = url::Url::parse(base).map_err(|e| {
        GatewayError::Upstream(UpstreamError::Permanent(format!("invalid SSE URL: {}", e)))
    })?;
    let resolved = base_url.join(endpoint).map_err(|e| {
        GatewayError::Upstream(UpstreamError::Permanent(format!(
            "invalid endpoint event payload: {}",
            e
        )))
    })?;
    Ok(resolved.to_string())
}
