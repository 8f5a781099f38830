//! REST virtual-tool executor
//!
//! Executes a virtual tool as an HTTP call shaped by its metadata. Argument
//! schemas partition properties by HTTP location (`path`, `query`, `header`,
//! `cookie`, `body`); properties marked `"visible": false` are hidden from
//! the model's view of the schema but injected from defaults at execution.

use base64::Engine;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::constants::{UPSTREAM_CONNECT_TIMEOUT_SECS, UPSTREAM_READ_TIMEOUT_SECS};
use crate::error::RpcError;
use crate::model::*;
use crate::{GatewayError, Result};

/// Drop every property subtree marked `"visible": false`
///
/// Applied to the schema before validating model-supplied arguments, and to
/// the schema exposed over `tools/list`. Removed properties are also dropped
/// from `required`.
pub fn filter_visible_properties(schema: &Value) -> Value {
    let Some(schema_map) = schema.as_object() else {
        return schema.clone();
    };
    let mut filtered = schema_map.clone();

    if let Some(properties) = schema_map.get("properties").and_then(Value::as_object) {
        let mut kept = Map::new();
        let mut removed_names = Vec::new();
        for (name, property) in properties {
            let invisible = property.get("visible") == Some(&Value::Bool(false));
            if invisible {
                removed_names.push(name.clone());
            } else {
                kept.insert(name.clone(), filter_visible_properties(property));
            }
        }
        filtered.insert("properties".to_string(), Value::Object(kept));

        if let Some(required) = schema_map.get("required").and_then(Value::as_array) {
            let remaining: Vec<Value> = required
                .iter()
                .filter(|name| {
                    name.as_str()
                        .is_none_or(|name| !removed_names.iter().any(|removed| removed == name))
                })
                .cloned()
                .collect();
            filtered.insert("required".to_string(), Value::Array(remaining));
        }
    }

    if let Some(items) = schema_map.get("items") {
        filtered.insert("items".to_string(), filter_visible_properties(items));
    }

    Value::Object(filtered)
}

/// Inject defaults for required-but-invisible properties, recursively.
///
/// A required invisible property without a default is a tool-authoring
/// error.
pub fn inject_required_but_invisible_defaults(
    schema: &Value,
    arguments: &mut Value,
) -> Result<()> {
    let Some(schema_map) = schema.as_object() else {
        return Ok(());
    };
    let Some(properties) = schema_map.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    let required: Vec<&str> = schema_map
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if !arguments.is_object() {
        *arguments = Value::Object(Map::new());
    }
    let arguments_map = arguments.as_object_mut().expect("object ensured above");

    for (name, property) in properties {
        let invisible = property.get("visible") == Some(&Value::Bool(false));
        if invisible && required.iter().any(|required_name| required_name == name) {
            if !arguments_map.contains_key(name) {
                let default = property.get("default").cloned().ok_or_else(|| {
                    GatewayError::internal(format!(
                        "required invisible property '{}' has no default",
                        name
                    ))
                })?;
                arguments_map.insert(name.clone(), default);
            }
            continue;
        }

        // Recurse into object-typed properties the caller supplied
        if property.get("properties").is_some()
            && let Some(nested) = arguments_map.get_mut(name)
        {
            inject_required_but_invisible_defaults(property, nested)?;
        }
    }
    Ok(())
}

/// Strip `null` leaves from the argument tree
pub fn remove_none_values(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                remove_none_values(v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                remove_none_values(item);
            }
        }
        _ => {}
    }
}

/// Validate arguments against a (pre-filtered) JSON schema
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<()> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| GatewayError::internal(format!("invalid tool schema: {}", e)))?;
    validator.validate(arguments).map_err(|e| {
        GatewayError::Rpc(RpcError::InvalidParams(format!(
            "invalid tool arguments: {}",
            e
        )))
    })
}

/// Executor for REST-type virtual tools
pub struct RestExecutor {
    client: reqwest::Client,
}

impl RestExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Execute a validated, default-injected argument set.
    ///
    /// Never fails the transport: anything going wrong during execution is
    /// reported through `CallToolResult::is_error`.
    pub async fn execute(
        &self,
        tool: &VirtualMcpTool,
        arguments: &Value,
        auth_token: Option<&AuthTokenData>,
    ) -> CallToolResult {
        let VirtualMcpToolMetadata::Rest { method, endpoint } = &tool.tool_metadata else {
            return CallToolResult::error(vec![ContentBlock::text(format!(
                "tool {} is not a REST tool",
                tool.name
            ))]);
        };

        let section = |name: &str| -> Map<String, Value> {
            arguments
                .get(name)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };
        let path = section("path");
        let mut query = section("query");
        let mut headers = section("header");
        let mut cookies = section("cookie");
        let mut body = section("body");

        // Substitute {name} placeholders in the endpoint
        let mut url = endpoint.clone();
        for (name, value) in &path {
            let placeholder = format!("{{{}}}", name);
            url = url.replace(&placeholder, &json_value_to_string(value));
        }

        if let Some(auth_token) = auth_token {
            let token = Value::String(auth_token.token_with_prefix());
            match auth_token.location {
                HttpLocation::Header => {
                    headers.insert(auth_token.name.clone(), token);
                }
                HttpLocation::Query => {
                    query.insert(auth_token.name.clone(), token);
                }
                HttpLocation::Cookie => {
                    cookies.insert(auth_token.name.clone(), token);
                }
                HttpLocation::Body => {
                    body.insert(auth_token.name.clone(), token);
                }
                HttpLocation::Path => {
                    return CallToolResult::error(vec![ContentBlock::text(
                        "path location is not supported for auth tokens",
                    )]);
                }
            }
        }

        let mut request = self
            .client
            .request(
                reqwest::Method::from_bytes(method.as_str().as_bytes())
                    .expect("method enum is always a valid HTTP method"),
                &url,
            )
            .timeout(Duration::from_secs(
                UPSTREAM_CONNECT_TIMEOUT_SECS + UPSTREAM_READ_TIMEOUT_SECS,
            ));

        if !query.is_empty() {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(name, value)| (name.clone(), json_value_to_string(value)))
                .collect();
            request = request.query(&pairs);
        }
        for (name, value) in &headers {
            request = request.header(name, json_value_to_string(value));
        }
        if !cookies.is_empty() {
            let cookie = cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, json_value_to_string(value)))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        if !body.is_empty() {
            request = request.json(&Value::Object(body));
        }

        tracing::info!(tool = %tool.name, method = method.as_str(), url = %url, "executing REST tool");

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(tool = %tool.name, error = %e, "REST tool request failed");
                return CallToolResult::error(vec![ContentBlock::text(e.to_string())]);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = parse_error_message(response).await;
            return CallToolResult::error(vec![ContentBlock::text(message)]);
        }

        match parse_response_data(response).await {
            Ok(data) => CallToolResult::success(vec![ContentBlock::text(data)]),
            Err(message) => CallToolResult::error(vec![ContentBlock::text(message)]),
        }
    }
}

fn json_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decode the response body: JSON stays JSON, text-ish content types decode
/// to text, anything else is base64
async fn parse_response_data(response: reqwest::Response) -> std::result::Result<String, String> {
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let bytes = response
        .bytes()
        .await
        .map_err(|e| format!("error reading response body: {}", e))?;
    if bytes.is_empty() {
        return Ok(String::new());
    }

    if content_type.contains("application/json") || content_type.split(';').next().is_some_and(|t| t.ends_with("+json")) {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::String(s)) => return Ok(s),
            Ok(value) => return Ok(value.to_string()),
            Err(_) => return Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    let text_like = content_type.starts_with("text/")
        || matches!(
            content_type.split(';').next().unwrap_or_default(),
            "application/xml" | "application/javascript" | "application/x-www-form-urlencoded"
        );
    if text_like {
        return Ok(String::from_utf8_lossy(&bytes).into_owned());
    }

    Ok(base64::engine::general_purpose::STANDARD.encode(&bytes))
}

/// Error bodies usually carry provider detail as JSON; fall back to status
async fn parse_error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<Value>(&body) {
        Ok(json) => json.to_string(),
        Err(_) if !body.is_empty() => format!("HTTP {}: {}", status, body),
        Err(_) => format!("HTTP {}", status),
    }
}
