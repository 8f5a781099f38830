//! Tool router
//!
//! Implements the two synthetic tools every bundle exposes: `SEARCH_TOOLS`
//! (semantic discovery over the union of permitted upstream tools) and
//! `EXECUTE_TOOL` (dispatch to the owning upstream or virtual server).
//! Enablement, routing and credential pass-through live here.

use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::constants::*;
use crate::credentials::{CredentialManager, resolve_auth_config};
use crate::embedding::EmbeddingClient;
use crate::error::RpcError;
use crate::model::*;
use crate::session::SessionManager;
use crate::storage::Storage;
use crate::transport::UpstreamClient;
use crate::virtual_mcp::VirtualMcpService;
use crate::{GatewayError, Result};

/// `SEARCH_TOOLS` arguments
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchToolsArgs {
    /// Use this to find relevant tools you might need. Returned results of
    /// this tool will be sorted by relevance to the intent.
    #[serde(default)]
    pub intent: Option<String>,

    /// The maximum number of tools to return from the search per response.
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Pagination offset.
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    SEARCH_TOOLS_DEFAULT_LIMIT
}

/// `EXECUTE_TOOL` arguments
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExecuteToolArgs {
    /// The name of the tool to execute
    pub tool_name: String,

    /// A dictionary containing key-value pairs of input parameters required
    /// by the specified tool. The parameter names and types must match those
    /// defined in the tool definition previously retrieved. If the tool
    /// requires no parameters, provide an empty object.
    pub tool_arguments: Value,
}

/// The two synthetic tool definitions, as serialized over `tools/list`
pub static GATEWAY_TOOLS: Lazy<Vec<McpToolSpec>> = Lazy::new(|| {
    vec![
        McpToolSpec {
            name: SEARCH_TOOLS_NAME.to_string(),
            description: "This tool allows you to find relevant tools and their schemas that can help complete your tasks.".to_string(),
            input_schema: schema_of::<SearchToolsArgs>(),
        },
        McpToolSpec {
            name: EXECUTE_TOOL_NAME.to_string(),
            description: "Execute a specific retrieved tool. Provide the executable tool name, and the required tool parameters for that tool based on tool definition retrieved.".to_string(),
            input_schema: schema_of::<ExecuteToolArgs>(),
        },
    ]
});

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

/// Routes `SEARCH_TOOLS` / `EXECUTE_TOOL` calls for a bundle
#[derive(Clone)]
pub struct ToolRouter {
    storage: Arc<dyn Storage>,
    credentials: CredentialManager,
    embedding: Arc<dyn EmbeddingClient>,
    sessions: SessionManager,
    virtual_mcp: Arc<VirtualMcpService>,
    http_client: reqwest::Client,
}

impl ToolRouter {
    pub fn new(
        storage: Arc<dyn Storage>,
        credentials: CredentialManager,
        embedding: Arc<dyn EmbeddingClient>,
        sessions: SessionManager,
        virtual_mcp: Arc<VirtualMcpService>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            storage,
            credentials,
            embedding,
            sessions,
            virtual_mcp,
            http_client,
        }
    }

    /// Dispatch one `tools/call` by synthetic tool name
    pub async fn call_tool(
        &self,
        bundle: &McpServerBundle,
        session: &McpSession,
        name: &str,
        arguments: &Value,
    ) -> Result<CallToolResult> {
        match name {
            SEARCH_TOOLS_NAME => {
                let args: SearchToolsArgs = decode_args(arguments)?;
                self.search_tools(bundle, args).await
            }
            EXECUTE_TOOL_NAME => {
                let args: ExecuteToolArgs = decode_args(arguments)?;
                self.execute_tool(bundle, session, args).await
            }
            other => Err(GatewayError::Rpc(RpcError::InvalidParams(format!(
                "Unknown tool: {}",
                other
            )))),
        }
    }

    /// SEARCH_TOOLS: k-NN (or name-ordered) search over the bundle's
    /// permitted tools, excluding tools disabled by their configuration
    pub async fn search_tools(
        &self,
        bundle: &McpServerBundle,
        args: SearchToolsArgs,
    ) -> Result<CallToolResult> {
        if args.limit == 0 {
            return Err(GatewayError::Rpc(RpcError::InvalidParams(
                "limit must be at least 1".to_string(),
            )));
        }

        let configurations = self.bundle_configurations(bundle).await?;
        let mut server_ids = Vec::with_capacity(configurations.len());
        let mut disabled_tool_ids: Vec<Uuid> = Vec::new();

        for configuration in &configurations {
            server_ids.push(configuration.mcp_server_id);
            if !configuration.all_tools_enabled {
                let all_tools = self
                    .storage
                    .get_tools_by_server(configuration.mcp_server_id)
                    .await?;
                disabled_tool_ids.extend(
                    all_tools
                        .iter()
                        .filter(|tool| !configuration.enabled_tools.contains(&tool.id))
                        .map(|tool| tool.id),
                );
            }
        }

        let query_vector = match &args.intent {
            Some(intent) if !intent.is_empty() => Some(self.embedding.embed(intent).await?),
            _ => None,
        };

        let tools = self
            .storage
            .search_tools(
                &server_ids,
                &disabled_tool_ids,
                query_vector.as_deref(),
                args.limit,
                args.offset,
            )
            .await?;
        tracing::info!(
            bundle_id = %bundle.id,
            intent = args.intent.as_deref().unwrap_or(""),
            results = tools.len(),
            disabled = disabled_tool_ids.len(),
            "search tools completed"
        );

        // one content item per tool
        let content = tools
            .iter()
            .map(|tool| {
                ContentBlock::text(
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "inputSchema": tool.input_schema,
                    })
                    .to_string(),
                )
            })
            .collect();
        Ok(CallToolResult::success(content))
    }

    /// EXECUTE_TOOL: enablement checks, credential resolution, then dispatch
    /// to the public upstream or the virtual MCP executor
    pub async fn execute_tool(
        &self,
        bundle: &McpServerBundle,
        session: &McpSession,
        args: ExecuteToolArgs,
    ) -> Result<CallToolResult> {
        let tool = self
            .storage
            .get_tool_by_name(&args.tool_name)
            .await?
            .ok_or_else(|| GatewayError::ToolNotFound(args.tool_name.clone()))?;

        let server = self
            .storage
            .get_server(tool.mcp_server_id)
            .await?
            .ok_or_else(|| GatewayError::not_found("mcp_server", tool.mcp_server_id.to_string()))?;

        // the bundle must carry a configuration for the owning server
        let configuration = self
            .bundle_configurations(bundle)
            .await?
            .into_iter()
            .find(|configuration| configuration.mcp_server_id == tool.mcp_server_id)
            .ok_or_else(|| GatewayError::ServerNotConfigured(server.name.clone()))?;

        if !configuration.all_tools_enabled && !configuration.enabled_tools.contains(&tool.id) {
            return Err(GatewayError::ToolNotEnabled(tool.name.clone()));
        }

        let auth_config = resolve_auth_config(&server, &configuration)?;
        let credentials = self
            .credentials
            .get_credentials(&server, &configuration, Some(bundle.user_id))
            .await?;

        if server.server_metadata.is_virtual_mcp_server {
            self.execute_virtual(&server, &tool, &args.tool_arguments, &auth_config, &credentials)
                .await
        } else {
            self.execute_upstream(
                &server,
                &tool,
                &args.tool_arguments,
                session,
                &auth_config,
                &credentials,
            )
            .await
        }
    }

    async fn execute_upstream(
        &self,
        server: &McpServer,
        tool: &McpTool,
        arguments: &Value,
        session: &McpSession,
        auth_config: &AuthConfig,
        credentials: &AuthCredentials,
    ) -> Result<CallToolResult> {
        let existing_session_id = session.external_mcp_sessions.get(&server.id).cloned();
        let client = UpstreamClient::connect(
            self.http_client.clone(),
            server,
            auth_config,
            credentials,
            existing_session_id.clone(),
        )
        .await?;

        let started = std::time::Instant::now();
        let result = client
            .call_tool_with_recovery(&tool.tool_metadata.canonical_tool_name, arguments)
            .await;
        crate::telemetry::observe_upstream_call(&server.name, started.elapsed().as_secs_f64());

        // A fresh upstream session may have emerged (first call or recovery
        // after "Session terminated"); merge it under the row lock
        if let Some(new_session_id) = client.session_id()
            && existing_session_id.as_deref() != Some(new_session_id.as_str())
        {
            self.sessions
                .record_upstream_session(session.id, server.id, &new_session_id)
                .await?;
        }

        result
    }

    async fn execute_virtual(
        &self,
        server: &McpServer,
        tool: &McpTool,
        arguments: &Value,
        auth_config: &AuthConfig,
        credentials: &AuthCredentials,
    ) -> Result<CallToolResult> {
        let auth_token = auth_token_for(auth_config, credentials);
        let virtual_tool = self
            .storage
            .get_virtual_tool_by_name(&tool.name)
            .await?
            .ok_or_else(|| GatewayError::ToolNotFound(tool.name.clone()))?;
        tracing::debug!(server = %server.name, tool = %tool.name, "executing virtual tool in-process");
        self.virtual_mcp
            .execute_tool(&virtual_tool, arguments, auth_token.as_ref())
            .await
    }

    /// Load the bundle's configurations, skipping stale entries
    async fn bundle_configurations(
        &self,
        bundle: &McpServerBundle,
    ) -> Result<Vec<McpServerConfiguration>> {
        let mut configurations = Vec::with_capacity(bundle.mcp_server_configuration_ids.len());
        let mut seen = HashSet::new();
        for configuration_id in &bundle.mcp_server_configuration_ids {
            if !seen.insert(*configuration_id) {
                continue;
            }
            match self.storage.get_configuration(*configuration_id).await? {
                Some(configuration) => configurations.push(configuration),
                None => {
                    tracing::error!(
                        configuration_id = %configuration_id,
                        bundle_id = %bundle.id,
                        "configuration listed in bundle not found"
                    );
                }
            }
        }
        Ok(configurations)
    }
}

/// Derive the virtual-MCP auth token from the resolved credentials
fn auth_token_for(
    auth_config: &AuthConfig,
    credentials: &AuthCredentials,
) -> Option<AuthTokenData> {
    match (auth_config, credentials) {
        (
            AuthConfig::ApiKey {
                location,
                name,
                prefix,
            },
            AuthCredentials::ApiKey { secret_key },
        ) => Some(AuthTokenData {
            location: *location,
            name: name.clone(),
            prefix: prefix.clone(),
            token: secret_key.clone(),
        }),
        (
            AuthConfig::Oauth2 {
                location,
                name,
                prefix,
                ..
            },
            AuthCredentials::Oauth2 { access_token, .. },
        ) => Some(AuthTokenData {
            location: *location,
            name: name.clone(),
            prefix: Some(prefix.clone()),
            token: access_token.clone(),
        }),
        _ => None,
    }
}

fn decode_args<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| GatewayError::Rpc(RpcError::InvalidParams(e.to_string())))
}
