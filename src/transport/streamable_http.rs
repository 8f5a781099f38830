//! Streamable-HTTP MCP client
//!
//! One JSON-RPC exchange per POST. The upstream may answer with a plain JSON
//! body or with a short-lived SSE stream carrying the response message; both
//! are handled. The upstream `mcp-session-id` response header is captured on
//! every exchange and replayed on subsequent requests.

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::constants::{MCP_PROTOCOL_VERSION_HEADER, MCP_SESSION_ID_HEADER, SUPPORTED_PROTOCOL_VERSION};
use crate::error::UpstreamError;
use crate::model::{CallToolResult, McpToolSpec};
use crate::{GatewayError, Result};

use super::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, UpstreamAuth, parse_call_tool_result,
    parse_tools_page,
};

/// Streamable-HTTP MCP client for one upstream server
pub struct StreamableHttpClient {
    client: reqwest::Client,
    url: String,
    auth: UpstreamAuth,
    session_id: Mutex<Option<String>>,
    /// True when constructed around a session id from a previous exchange;
    /// `initialize` is skipped in that case
    existing_session: bool,
    next_id: AtomicI64,
}

impl StreamableHttpClient {
    pub fn new(
        client: reqwest::Client,
        url: String,
        auth: UpstreamAuth,
        existing_session_id: Option<String>,
    ) -> Self {
        let existing_session = existing_session_id.is_some();
        Self {
            client,
            url,
            auth,
            session_id: Mutex::new(existing_session_id),
            existing_session,
            next_id: AtomicI64::new(1),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn has_existing_session(&self) -> bool {
        self.existing_session
    }

    /// Forget the current session id so the next `initialize` starts fresh
    pub fn reset_session(&self) {
        *self.session_id.lock() = None;
    }

    /// Initialize the upstream session and return its session id, if issued
    pub async fn initialize(&self) -> Result<Option<String>> {
        let params = json!({
            "protocolVersion": SUPPORTED_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "aci-gateway",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        self.request("initialize", params).await?;
        self.notify("notifications/initialized").await?;
        Ok(self.session_id())
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

        let response = self.send(serde_json::to_value(&request)?).await?;
        let parsed = self.read_response(response, id).await?;

        if let Some(error) = parsed.error {
            return Err(GatewayError::Upstream(error.into_upstream_error()));
        }
        parsed.result.ok_or_else(|| {
            GatewayError::Upstream(UpstreamError::Permanent(format!(
                "upstream returned no result for {}",
                method
            )))
        })
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0",
            method,
        };
        let response = self.send(serde_json::to_value(&notification)?).await?;
        // 202 with empty body is the expected shape; drain and ignore
        let _ = response.bytes().await;
        Ok(())
    }

    async fn send(&self, body: Value) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .header(MCP_PROTOCOL_VERSION_HEADER, SUPPORTED_PROTOCOL_VERSION)
            .json(&body);

        if let Some(session_id) = self.session_id() {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }
        request = self.auth.apply(request);

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(UpstreamError::Transient(e.to_string())))?;

        // Capture a (possibly renewed) upstream session id
        if let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(session_id.to_string());
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // Streamable-HTTP servers answer 404 when the session has expired
        if status == reqwest::StatusCode::NOT_FOUND && self.existing_session {
            return Err(GatewayError::Upstream(UpstreamError::SessionTerminated));
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(GatewayError::Upstream(UpstreamError::Transient(format!(
                "upstream returned {}: {}",
                status, body
            ))));
        }
        Err(GatewayError::Upstream(UpstreamError::Permanent(format!(
            "upstream returned {}: {}",
            status, body
        ))))
    }

    async fn read_response(&self, response: reqwest::Response, id: i64) -> Result<JsonRpcResponse> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            return self.read_sse_response(response, id).await;
        }

        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| GatewayError::Upstream(UpstreamError::Permanent(format!(
                "invalid upstream response: {}",
                e
            ))))
    }

    /// Scan the SSE stream for the response message matching our request id
    async fn read_sse_response(
        &self,
        response: reqwest::Response,
        id: i64,
    ) -> Result<JsonRpcResponse> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| GatewayError::Upstream(UpstreamError::Transient(e.to_string())))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(boundary) = find_event_boundary(&buffer) {
                let event = buffer[..boundary.start].to_string();
                buffer.drain(..boundary.end);
                if let Some(data) = sse_event_data(&event)
                    && let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&data)
                    && parsed.id.as_ref().and_then(Value::as_i64) == Some(id)
                {
                    return Ok(parsed);
                }
            }
        }

        Err(GatewayError::Upstream(UpstreamError::Permanent(
            "upstream SSE stream closed before a response arrived".to_string(),
        )))
    }
}

struct EventBoundary {
    /// Length of the event text itself
    start: usize,
    /// Length including the delimiter
    end: usize,
}

/// Find the first complete SSE event in the buffer
fn find_event_boundary(buffer: &str) -> Option<EventBoundary> {
    let lf = buffer.find("\n\n").map(|at| (at, at + 2));
    let crlf = buffer.find("\r\n\r\n").map(|at| (at, at + 4));
    let (start, end) = match (lf, crlf) {
        (Some(a), Some(b)) if b.0 < a.0 => b,
        (Some(a), _) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some(EventBoundary { start, end })
}

/// Join the `data:` lines of one SSE event
pub(crate) fn sse_event_data(event: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
