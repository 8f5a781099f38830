//! Connector virtual-tool executor
//!
//! Connectors are in-process tool implementations tied to one virtual MCP
//! server. They are registered by server name at startup (no runtime
//! import-by-name); a tool `GMAIL__SEND_EMAIL` dispatches to the `GMAIL`
//! connector's `send_email` method. Connectors must never crash the
//! gateway: panics and errors become `is_error` results.

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::*;

/// An in-process tool implementation for one virtual MCP server
#[async_trait]
pub trait Connector: Send + Sync {
    /// The virtual server name this connector backs, e.g. `GMAIL`
    fn server_name(&self) -> &'static str;

    /// Invoke a method (the lowercased tool suffix) with the caller's
    /// arguments and auth token. Implementations report failures through
    /// `CallToolResult::error`, never by panicking.
    async fn call(
        &self,
        method: &str,
        arguments: &Map<String, Value>,
        auth_token: Option<&AuthTokenData>,
    ) -> CallToolResult;
}

/// Registry mapping virtual server names to connector implementations
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<&'static str, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in connectors
    pub fn with_builtins(http_client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::connectors::gmail::GmailConnector::new(
            http_client,
        )));
        registry
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.server_name(), connector);
    }

    pub fn get(&self, server_name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(server_name).cloned()
    }

    /// Execute a connector tool, resolving the connector and method from the
    /// tool name. Unknown connectors/methods and panics inside the connector
    /// all come back as error results.
    pub async fn execute(
        &self,
        tool: &VirtualMcpTool,
        arguments: &Value,
        auth_token: Option<&AuthTokenData>,
    ) -> CallToolResult {
        let Some((server_name, suffix)) = split_tool_name(&tool.name) else {
            return CallToolResult::error(vec![ContentBlock::text(format!(
                "malformed connector tool name: {}",
                tool.name
            ))]);
        };
        let method = suffix.to_lowercase();

        let Some(connector) = self.get(server_name) else {
            tracing::error!(tool = %tool.name, server = server_name, "connector not registered");
            return CallToolResult::error(vec![ContentBlock::text(format!(
                "connector not found for tool {}",
                tool.name
            ))]);
        };

        let empty = Map::new();
        let arguments_map = arguments.as_object().unwrap_or(&empty);

        let call = connector.call(&method, arguments_map, auth_token);
        match std::panic::AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(tool = %tool.name, method = %method, "connector panicked");
                CallToolResult::error(vec![ContentBlock::text("Internal connector error")])
            }
        }
    }
}

/// Error result for a method the connector does not implement
pub fn method_not_found(method: &str) -> CallToolResult {
    CallToolResult::error(vec![ContentBlock::text(format!(
        "Method {} not found",
        method
    ))])
}

/// Shorthand for a structured success result with a JSON payload
pub fn structured_result(payload: Value) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::text(payload.to_string())],
        structured_content: Some(payload),
        is_error: None,
    }
}

/// Decode a typed argument struct out of the raw argument map
pub fn decode_arguments<T: serde::de::DeserializeOwned>(
    arguments: &Map<String, Value>,
) -> std::result::Result<T, CallToolResult> {
    serde_json::from_value(Value::Object(arguments.clone())).map_err(|e| {
        CallToolResult::error(vec![ContentBlock::text(format!(
            "invalid arguments: {}",
            e
        ))])
    })
}
