//! Upstream MCP transport
//!
//! Opens MCP client sessions to upstream servers over streamable-HTTP or
//! legacy SSE, injects credentials per auth config, and exposes
//! `initialize` / `list_tools` / `call_tool`. Streamable-HTTP clients
//! capture and reuse the upstream `mcp-session-id`; the gateway never sends
//! DELETE on drop because the logical session outlives each HTTP exchange.

pub mod sse;
pub mod streamable_http;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{JSONRPC_INVALID_REQUEST, SESSION_TERMINATED_MESSAGE};
use crate::error::UpstreamError;
use crate::model::*;
use crate::{GatewayError, Result};

pub use sse::SseClient;
pub use streamable_http::StreamableHttpClient;

#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: &'a str,
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    /// Map an upstream JSON-RPC error to the transport error taxonomy
    pub fn into_upstream_error(self) -> UpstreamError {
        if self.code == JSONRPC_INVALID_REQUEST && self.message == SESSION_TERMINATED_MESSAGE {
            UpstreamError::SessionTerminated
        } else {
            UpstreamError::Mcp {
                code: self.code,
                message: self.message,
                data: self.data,
            }
        }
    }
}

/// Credential injection for upstream HTTP requests
///
/// Path is never a legal auth location; body injection would corrupt the
/// JSON-RPC payload and is rejected for MCP transports (the REST executor
/// supports it for virtual tools).
#[derive(Debug, Clone, Default)]
pub struct UpstreamAuth {
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
}

impl UpstreamAuth {
    pub fn from_credentials(
        auth_config: &AuthConfig,
        credentials: &AuthCredentials,
    ) -> Result<Self> {
        let mut auth = UpstreamAuth::default();
        match (auth_config, credentials) {
            (AuthConfig::NoAuth, AuthCredentials::NoAuth) => {}
            (
                AuthConfig::ApiKey {
                    location,
                    name,
                    prefix,
                },
                AuthCredentials::ApiKey { secret_key },
            ) => {
                let value = match prefix {
                    Some(prefix) => format!("{} {}", prefix, secret_key),
                    None => secret_key.clone(),
                };
                match location {
                    HttpLocation::Header => auth.headers.push((name.clone(), value)),
                    HttpLocation::Query => auth.query.push((name.clone(), value)),
                    HttpLocation::Cookie => auth.cookies.push((name.clone(), value)),
                    HttpLocation::Path | HttpLocation::Body => {
                        return Err(GatewayError::Upstream(UpstreamError::Permanent(format!(
                            "api key location '{}' is not supported for MCP transports",
                            location.as_str()
                        ))));
                    }
                }
            }
            (
                AuthConfig::Oauth2 { name, prefix, .. },
                AuthCredentials::Oauth2 { access_token, .. },
            ) => {
                auth.headers
                    .push((name.clone(), format!("{} {}", prefix, access_token)));
            }
            _ => {
                return Err(GatewayError::Upstream(UpstreamError::Permanent(
                    "auth config and credentials disagree on scheme".to_string(),
                )));
            }
        }
        Ok(auth)
    }

    pub(crate) fn apply(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if !self.query.is_empty() {
            request = request.query(&self.query);
        }
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        request
    }
}

/// One upstream MCP client, transport-erased
pub enum UpstreamClient {
    Http(StreamableHttpClient),
    Sse(SseClient),
}

impl UpstreamClient {
    /// Open a client for a server, reusing `existing_session_id` when given
    /// (streamable-HTTP skips `initialize` in that case; SSE upstreams are
    /// session-less).
    pub async fn connect(
        http_client: reqwest::Client,
        server: &McpServer,
        auth_config: &AuthConfig,
        credentials: &AuthCredentials,
        existing_session_id: Option<String>,
    ) -> Result<Self> {
        let auth = UpstreamAuth::from_credentials(auth_config, credentials)?;
        match server.transport {
            TransportType::StreamableHttp => Ok(UpstreamClient::Http(StreamableHttpClient::new(
                http_client,
                server.url.clone(),
                auth,
                existing_session_id,
            ))),
            TransportType::Sse => {
                let client = SseClient::connect(http_client, server.url.clone(), auth).await?;
                Ok(UpstreamClient::Sse(client))
            }
        }
    }

    /// Initialize the upstream session; returns the upstream session id when
    /// the server issued one
    pub async fn initialize(&self) -> Result<Option<String>> {
        match self {
            UpstreamClient::Http(client) => client.initialize().await,
            UpstreamClient::Sse(client) => {
                client.initialize().await?;
                Ok(None)
            }
        }
    }

    /// The upstream session id currently in use, if any
    pub fn session_id(&self) -> Option<String> {
        match self {
            UpstreamClient::Http(client) => client.session_id(),
            UpstreamClient::Sse(_) => None,
        }
    }

    /// Whether this client was constructed around a pre-existing session id
    pub fn has_existing_session(&self) -> bool {
        match self {
            UpstreamClient::Http(client) => client.has_existing_session(),
            UpstreamClient::Sse(_) => false,
        }
    }

    /// List all tools, walking the `nextCursor` chain until exhausted
    pub async fn list_tools(&self) -> Result<Vec<McpToolSpec>> {
        match self {
            UpstreamClient::Http(client) => client.list_tools().await,
            UpstreamClient::Sse(client) => client.list_tools().await,
        }
    }

    /// Call one tool; upstream JSON-RPC errors surface as `UpstreamError`
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> Result<CallToolResult> {
        match self {
            UpstreamClient::Http(client) => client.call_tool(name, arguments).await,
            UpstreamClient::Sse(client) => client.call_tool(name, arguments).await,
        }
    }

    /// Call a tool, initializing first when no session is being reused, and
    /// recovering once from an upstream "Session terminated" by
    /// re-initializing and retrying the same call.
    pub async fn call_tool_with_recovery(
        &self,
        name: &str,
        arguments: &Value,
    ) -> Result<CallToolResult> {
        if !self.has_existing_session() {
            self.initialize().await?;
            return self.call_tool(name, arguments).await;
        }

        match self.call_tool(name, arguments).await {
            Err(GatewayError::Upstream(UpstreamError::SessionTerminated)) => {
                tracing::warn!(tool = name, "upstream session terminated, reinitializing once");
                if let UpstreamClient::Http(client) = self {
                    client.reset_session();
                }
                self.initialize().await?;
                self.call_tool(name, arguments).await
            }
            other => other,
        }
    }
}

/// Parse one tool list page result
pub(crate) fn parse_tools_page(result: Value) -> Result<(Vec<McpToolSpec>, Option<String>)> {
    #[derive(Deserialize)]
    struct RawTool {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(rename = "inputSchema")]
        input_schema: Value,
    }

    #[derive(Deserialize)]
    struct ToolsPage {
        tools: Vec<RawTool>,
        #[serde(rename = "nextCursor")]
        next_cursor: Option<String>,
    }

    let page: ToolsPage = serde_json::from_value(result)
        .map_err(|e| GatewayError::Upstream(UpstreamError::Permanent(format!(
            "invalid tools/list result: {}",
            e
        ))))?;

    let tools = page
        .tools
        .into_iter()
        .map(|tool| McpToolSpec {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool.input_schema,
        })
        .collect();
    Ok((tools, page.next_cursor))
}

/// Parse a `tools/call` result payload
pub(crate) fn parse_call_tool_result(result: Value) -> Result<CallToolResult> {
    serde_json::from_value(result).map_err(|e| {
        GatewayError::Upstream(UpstreamError::Permanent(format!(
            "invalid tools/call result: {}",
            e
        )))
    })
}
