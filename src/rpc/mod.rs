//! JSON-RPC 2.0 protocol engine
//!
//! Parses a single JSON object (batches are not supported), discriminates it
//! into one of the five supported MCP methods, and builds response
//! envelopes. When the request id cannot be recovered, responses carry
//! `id: null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;
use crate::{GatewayError, Result};

/// Raw shape every payload must have before method discrimination
#[derive(Debug, Deserialize)]
struct RawPayload {
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    #[allow(dead_code)]
    params: Option<Value>,
}

/// `initialize` params
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, rename = "clientInfo")]
    pub client_info: Value,
}

/// `tools/call` params
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A parsed MCP request
#[derive(Debug, Clone)]
pub enum McpRequest {
    Initialize { id: Value, params: InitializeParams },
    ToolsList { id: Value },
    ToolsCall { id: Value, params: ToolCallParams },
    NotificationInitialized,
    Ping { id: Value },
}

impl McpRequest {
    /// The request id; notifications have none
    pub fn id(&self) -> Option<&Value> {
        match self {
            McpRequest::Initialize { id, .. }
            | McpRequest::ToolsList { id }
            | McpRequest::ToolsCall { id, .. }
            | McpRequest::Ping { id } => Some(id),
            McpRequest::NotificationInitialized => None,
        }
    }
}

/// Parse a request body into an MCP request.
///
/// Error variants carry whatever request id could be recovered so the error
/// envelope can echo it.
pub fn parse_payload(body: &[u8]) -> Result<McpRequest> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::Rpc(RpcError::Parse(e.to_string())))?;

    if !value.is_object() {
        return Err(GatewayError::Rpc(RpcError::InvalidRequest {
            message: "payload must be a single JSON-RPC object".to_string(),
            id: None,
        }));
    }
    let recovered_id = value.get("id").cloned();

    let raw: RawPayload = serde_json::from_value(value.clone()).map_err(|e| {
        GatewayError::Rpc(RpcError::InvalidRequest {
            message: format!("invalid payload: {}", e),
            id: recovered_id.clone(),
        })
    })?;
    if raw.jsonrpc != "2.0" {
        return Err(GatewayError::Rpc(RpcError::InvalidRequest {
            message: format!("unsupported jsonrpc version: {}", raw.jsonrpc),
            id: recovered_id.clone(),
        }));
    }

    let require_id = || -> Result<Value> {
        raw.id.clone().ok_or_else(|| {
            GatewayError::Rpc(RpcError::InvalidRequest {
                message: format!("method {} requires an id", raw.method),
                id: None,
            })
        })
    };

    match raw.method.as_str() {
        "initialize" => {
            let params = parse_params(&value, &recovered_id, "initialize")?;
            Ok(McpRequest::Initialize {
                id: require_id()?,
                params,
            })
        }
        "tools/list" => Ok(McpRequest::ToolsList { id: require_id()? }),
        "tools/call" => {
            let params = parse_params(&value, &recovered_id, "tools/call")?;
            Ok(McpRequest::ToolsCall {
                id: require_id()?,
                params,
            })
        }
        "notifications/initialized" => Ok(McpRequest::NotificationInitialized),
        "ping" => Ok(McpRequest::Ping { id: require_id()? }),
        method => Err(GatewayError::Rpc(RpcError::MethodNotFound {
            method: method.to_string(),
            id: recovered_id,
        })),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    value: &Value,
    recovered_id: &Option<Value>,
    method: &str,
) -> Result<T> {
    let params = value.get("params").cloned().unwrap_or_else(empty_object);
    serde_json::from_value(params).map_err(|e| {
        GatewayError::Rpc(RpcError::InvalidRequest {
            message: format!("invalid {} request: {}", method, e),
            id: recovered_id.clone(),
        })
    })
}

/// JSON-RPC success envelope
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcSuccess {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub result: Value,
}

impl JsonRpcSuccess {
    pub fn new(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result,
        }
    }
}

/// JSON-RPC error envelope
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcFailure {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub error: ErrorData,
}

/// Error member of a JSON-RPC error envelope
#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcFailure {
    pub fn new(id: Option<Value>, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.unwrap_or(Value::Null),
            error: ErrorData {
                code,
                message: message.into(),
                data,
            },
        }
    }

    /// Build the error envelope for a gateway error
    pub fn from_error(id: Option<Value>, error: &GatewayError) -> Self {
        // Parse-stage errors may carry a better id than the caller recovered
        let id = match error {
            GatewayError::Rpc(RpcError::InvalidRequest { id: parsed_id, .. })
            | GatewayError::Rpc(RpcError::MethodNotFound { id: parsed_id, .. }) => {
                parsed_id.clone().or(id)
            }
            _ => id,
        };
        Self::new(
            id,
            error.jsonrpc_code(),
            error.to_string(),
            error.jsonrpc_data(),
        )
    }
}
