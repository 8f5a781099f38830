//! Virtual MCP service
//!
//! Serves tools whose implementation lives inside the gateway. The service
//! speaks the same JSON-RPC profile as the main MCP endpoint, addressed by
//! `POST /virtual/mcp?server_name=<NAME>`. Tools execute either as REST
//! calls shaped by their metadata or through registered in-process
//! connectors. The caller's credentials arrive in the
//! `x-virtual-mcp-auth-token` header.

pub mod connector;
pub mod connectors;
pub mod rest;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::constants::*;
use crate::error::{AuthError, RpcError};
use crate::model::*;
use crate::rpc::{self, JsonRpcFailure, JsonRpcSuccess, McpRequest};
use crate::storage::Storage;
use crate::{GatewayError, Result};

pub use connector::{Connector, ConnectorRegistry};
pub use rest::RestExecutor;

/// Parse the `x-virtual-mcp-auth-token` header:
/// `<location> <name> [<prefix>] <token>` (3 or 4 whitespace-separated
/// fields)
pub fn parse_auth_token(header_value: &str) -> Result<AuthTokenData> {
    let fields: Vec<&str> = header_value.split_whitespace().collect();
    if fields.len() != 3 && fields.len() != 4 {
        return Err(GatewayError::Auth(AuthError::InvalidAuthToken));
    }
    let location = HttpLocation::parse(fields[0])
        .ok_or(GatewayError::Auth(AuthError::InvalidAuthToken))?;
    Ok(AuthTokenData {
        location,
        name: fields[1].to_string(),
        prefix: (fields.len() == 4).then(|| fields[2].to_string()),
        token: fields[fields.len() - 1].to_string(),
    })
}

/// Build the header value the gateway sends to a virtual MCP server
pub fn format_auth_token(token: &AuthTokenData) -> String {
    match &token.prefix {
        Some(prefix) => format!(
            "{} {} {} {}",
            token.location.as_str(),
            token.name,
            prefix,
            token.token
        ),
        None => format!("{} {} {}", token.location.as_str(), token.name, token.token),
    }
}

/// Virtual MCP service state
#[derive(Clone)]
pub struct VirtualMcpService {
    storage: Arc<dyn Storage>,
    connectors: ConnectorRegistry,
    rest: Arc<RestExecutor>,
}

impl VirtualMcpService {
    pub fn new(
        storage: Arc<dyn Storage>,
        connectors: ConnectorRegistry,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            storage,
            connectors,
            rest: Arc::new(RestExecutor::new(http_client)),
        }
    }

    /// Execute one virtual tool: validate, inject invisible defaults, strip
    /// nulls, then dispatch by metadata type.
    ///
    /// Validation failures are protocol errors; execution failures come back
    /// as `is_error` results.
    pub async fn execute_tool(
        &self,
        tool: &VirtualMcpTool,
        arguments: &Value,
        auth_token: Option<&AuthTokenData>,
    ) -> Result<CallToolResult> {
        let mut arguments = arguments.clone();
        match &tool.tool_metadata {
            VirtualMcpToolMetadata::Rest { .. } => {
                // The model only ever sees the visible subset of the schema
                let visible_schema = rest::filter_visible_properties(&tool.input_schema);
                rest::validate_arguments(&visible_schema, &arguments)?;
                rest::inject_required_but_invisible_defaults(&tool.input_schema, &mut arguments)?;
                rest::remove_none_values(&mut arguments);
                Ok(self.rest.execute(tool, &arguments, auth_token).await)
            }
            VirtualMcpToolMetadata::Connector => {
                rest::validate_arguments(&tool.input_schema, &arguments)?;
                rest::remove_none_values(&mut arguments);
                Ok(self.connectors.execute(tool, &arguments, auth_token).await)
            }
        }
    }

    /// Tool list for one virtual server, with invisible properties filtered
    /// and names reduced to their canonical (suffix) form
    pub async fn list_tools(&self, server: &VirtualMcpServer) -> Result<Vec<McpToolSpec>> {
        let tools = self.storage.get_virtual_tools_by_server(server.id).await?;
        Ok(tools
            .iter()
            .map(|tool| {
                let input_schema = match &tool.tool_metadata {
                    VirtualMcpToolMetadata::Rest { .. } => {
                        rest::filter_visible_properties(&tool.input_schema)
                    }
                    VirtualMcpToolMetadata::Connector => tool.input_schema.clone(),
                };
                McpToolSpec {
                    name: split_tool_name(&tool.name)
                        .map(|(_, suffix)| suffix.to_string())
                        .unwrap_or_else(|| tool.name.clone()),
                    description: tool.description.clone(),
                    input_schema,
                }
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct VirtualMcpQuery {
    server_name: String,
}

/// Routes for the virtual MCP endpoint
pub fn create_virtual_mcp_routes(service: Arc<VirtualMcpService>) -> Router {
    Router::new()
        .route("/virtual/mcp", any(virtual_mcp_handler))
        .with_state(service)
}

async fn virtual_mcp_handler(
    State(service): State<Arc<VirtualMcpService>>,
    Query(query): Query<VirtualMcpQuery>,
    headers: HeaderMap,
    method: axum::http::Method,
    body: bytes::Bytes,
) -> Response {
    match method {
        axum::http::Method::POST => {}
        axum::http::Method::DELETE => return StatusCode::NO_CONTENT.into_response(),
        _ => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }

    let auth_token = match headers
        .get(VIRTUAL_MCP_AUTH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(parse_auth_token)
        .transpose()
    {
        Ok(token) => token,
        Err(error) => {
            return Json(JsonRpcFailure::from_error(None, &error)).into_response();
        }
    };

    let protocol_version = headers
        .get(MCP_PROTOCOL_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = match rpc::parse_payload(&body) {
        Ok(request) => request,
        Err(error) => {
            return Json(JsonRpcFailure::from_error(None, &error)).into_response();
        }
    };

    match request {
        McpRequest::Initialize { id, .. } => {
            let result = json!({
                "protocolVersion": protocol_version
                    .unwrap_or_else(|| SUPPORTED_PROTOCOL_VERSION.to_string()),
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {
                    "name": format!("ACI.dev {} MCP", query.server_name),
                    "title": format!("ACI.dev {} MCP", query.server_name),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "instructions": "",
            });
            Json(JsonRpcSuccess::new(id, result)).into_response()
        }

        McpRequest::ToolsList { id } => {
            match handle_tools_list(&service, &query.server_name).await {
                Ok(tools) => {
                    Json(JsonRpcSuccess::new(id, json!({ "tools": tools }))).into_response()
                }
                Err(error) => Json(JsonRpcFailure::from_error(Some(id), &error)).into_response(),
            }
        }

        McpRequest::ToolsCall { id, params } => {
            match handle_tools_call(
                &service,
                &query.server_name,
                &params.name,
                &params.arguments,
                auth_token.as_ref(),
            )
            .await
            {
                Ok(result) => {
                    let result = serde_json::to_value(&result).unwrap_or_default();
                    Json(JsonRpcSuccess::new(id, result)).into_response()
                }
                Err(error) => Json(JsonRpcFailure::from_error(Some(id), &error)).into_response(),
            }
        }

        // 202 is load-bearing: some clients stall on other statuses
        McpRequest::NotificationInitialized => StatusCode::ACCEPTED.into_response(),

        McpRequest::Ping { id } => Json(JsonRpcSuccess::new(id, json!({}))).into_response(),
    }
}

async fn handle_tools_list(
    service: &VirtualMcpService,
    server_name: &str,
) -> Result<Vec<McpToolSpec>> {
    let server = service
        .storage
        .get_virtual_server_by_name(server_name)
        .await?
        .ok_or_else(|| {
            GatewayError::Rpc(RpcError::InvalidRequest {
                message: format!("MCP server '{}' not found", server_name),
                id: None,
            })
        })?;
    service.list_tools(&server).await
}

async fn handle_tools_call(
    service: &VirtualMcpService,
    server_name: &str,
    tool_suffix: &str,
    arguments: &Value,
    auth_token: Option<&AuthTokenData>,
) -> Result<CallToolResult> {
    let server = service
        .storage
        .get_virtual_server_by_name(server_name)
        .await?
        .ok_or_else(|| {
            GatewayError::Rpc(RpcError::InvalidRequest {
                message: format!("MCP server '{}' not found", server_name),
                id: None,
            })
        })?;

    let tool_name = format!("{}__{}", server.name, tool_suffix);
    let tool = service
        .storage
        .get_virtual_tool_by_name(&tool_name)
        .await?
        .ok_or_else(|| {
            GatewayError::Rpc(RpcError::InvalidRequest {
                message: format!("Tool {} not found", tool_suffix),
                id: None,
            })
        })?;

    service.execute_tool(&tool, arguments, auth_token).await
}

#[cfg(test)]
mod connector_test;
#[cfg(test)]
mod rest_test;
#[cfg(test)]
mod virtual_mcp_test;
