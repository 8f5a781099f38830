//! Core data models for the gateway
//!
//! This module contains the entities persisted by the catalog store
//! (organizations, servers, configurations, accounts, tools, bundles,
//! sessions) plus the MCP wire types exchanged with clients and upstreams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Root tenancy unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,

    /// Unique, case-sensitive
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Identity provider a user signed up with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityProvider {
    Password,
    Google,
}

/// A gateway user; may belong to many organizations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,

    pub name: String,

    /// Lowercased, unique
    pub email: String,

    pub email_verified: bool,

    pub identity_provider: IdentityProvider,

    /// Only present for password-based identities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

/// Team within an organization; name unique per org
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
}

// ============================================================================
// AUTH CONFIGS & CREDENTIALS
// ============================================================================

/// Auth scheme selected by a configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    NoAuth,
    ApiKey,
    Oauth2,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::NoAuth => "no_auth",
            AuthType::ApiKey => "api_key",
            AuthType::Oauth2 => "oauth2",
        }
    }
}

/// Where a credential or argument is placed in an HTTP request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HttpLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl HttpLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpLocation::Path => "path",
            HttpLocation::Query => "query",
            HttpLocation::Header => "header",
            HttpLocation::Cookie => "cookie",
            HttpLocation::Body => "body",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(HttpLocation::Path),
            "query" => Some(HttpLocation::Query),
            "header" => Some(HttpLocation::Header),
            "cookie" => Some(HttpLocation::Cookie),
            "body" => Some(HttpLocation::Body),
            _ => None,
        }
    }
}

/// Token endpoint client authentication method
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    #[default]
    ClientSecretBasic,
    ClientSecretPost,
}

/// Per-scheme auth configuration stored on a server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    NoAuth,

    ApiKey {
        location: HttpLocation,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },

    Oauth2 {
        /// Always `header` for OAuth2
        #[serde(default = "default_oauth2_location")]
        location: HttpLocation,
        #[serde(default = "default_oauth2_name")]
        name: String,
        #[serde(default = "default_oauth2_prefix")]
        prefix: String,
        client_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_secret: Option<String>,
        /// Space-separated scopes
        scope: String,
        authorize_url: String,
        access_token_url: String,
        refresh_token_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token_endpoint_auth_method: Option<TokenEndpointAuthMethod>,
    },
}

fn default_oauth2_location() -> HttpLocation {
    HttpLocation::Header
}

fn default_oauth2_name() -> String {
    "Authorization".to_string()
}

fn default_oauth2_prefix() -> String {
    "Bearer".to_string()
}

impl AuthConfig {
    pub fn auth_type(&self) -> AuthType {
        match self {
            AuthConfig::NoAuth => AuthType::NoAuth,
            AuthConfig::ApiKey { .. } => AuthType::ApiKey,
            AuthConfig::Oauth2 { .. } => AuthType::Oauth2,
        }
    }
}

/// Credentials stored on a connected account, matching the AuthConfig shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthCredentials {
    NoAuth,

    ApiKey {
        secret_key: String,
    },

    Oauth2 {
        access_token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token_type: Option<String>,
        /// Unix seconds; present when the provider reported an expiry
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
    },
}

impl AuthCredentials {
    pub fn auth_type(&self) -> AuthType {
        match self {
            AuthCredentials::NoAuth => AuthType::NoAuth,
            AuthCredentials::ApiKey { .. } => AuthType::ApiKey,
            AuthCredentials::Oauth2 { .. } => AuthType::Oauth2,
        }
    }
}

// ============================================================================
// MCP SERVERS & TOOLS
// ============================================================================

/// Upstream transport flavor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    StreamableHttp,
    Sse,
}

/// Free-form server metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMetadata {
    /// Whether the `mcp-session-id` header is required by the upstream
    #[serde(default)]
    pub need_session: bool,

    /// Marks servers whose tools execute inside the gateway itself
    #[serde(default)]
    pub is_virtual_mcp_server: bool,
}

/// An upstream (or virtual) MCP server known to the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    pub id: Uuid,

    /// ALLCAPS `[A-Z0-9_]+`, no `__`, globally unique
    pub name: String,

    pub url: String,

    pub transport: TransportType,

    pub description: String,

    pub categories: Vec<String>,

    /// One entry per supported auth scheme
    pub auth_configs: Vec<AuthConfig>,

    pub server_metadata: ServerMetadata,

    /// None = public server usable by any organization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,

    pub embedding: Vec<f32>,
}

impl McpServer {
    /// Text embedded for semantic server search
    pub fn embedding_text(&self) -> String {
        serde_json::json!({
            "name": self.name,
            "url": self.url,
            "description": self.description,
            "categories": self.categories,
        })
        .to_string()
    }
}

/// Who a connected account belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectedAccountOwnership {
    Individual,
    Shared,
    Operational,
}

impl ConnectedAccountOwnership {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectedAccountOwnership::Individual => "individual",
            ConnectedAccountOwnership::Shared => "shared",
            ConnectedAccountOwnership::Operational => "operational",
        }
    }
}

/// Organization-scoped binding of a server with an auth choice, team ACL and
/// tool enablement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfiguration {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub mcp_server_id: Uuid,
    pub name: String,

    /// Must be one of the types present in the server's `auth_configs`
    pub auth_type: AuthType,

    pub connected_account_ownership: ConnectedAccountOwnership,

    /// When true, `enabled_tools` is empty
    pub all_tools_enabled: bool,

    pub enabled_tools: HashSet<Uuid>,

    pub allowed_teams: HashSet<Uuid>,
}

/// Domain view of connected-account ownership; makes credential selection total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountOwner {
    Individual { user_id: Uuid },
    Shared,
    Operational,
}

/// Per-(user, configuration) credential store
///
/// Storage stays flat (`user_id` nullable for shared/operational rows); the
/// domain view is the [`AccountOwner`] sum type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: Uuid,

    /// Null for shared/operational accounts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,

    pub mcp_server_configuration_id: Uuid,

    pub ownership: ConnectedAccountOwnership,

    pub auth_credentials: AuthCredentials,
}

impl ConnectedAccount {
    pub fn owner(&self) -> AccountOwner {
        match (self.ownership, self.user_id) {
            (ConnectedAccountOwnership::Individual, Some(user_id)) => {
                AccountOwner::Individual { user_id }
            }
            (ConnectedAccountOwnership::Shared, _) => AccountOwner::Shared,
            _ => AccountOwner::Operational,
        }
    }
}

/// Canonical-name bookkeeping for a synced tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpToolMetadata {
    /// Name as reported by the upstream
    pub canonical_tool_name: String,

    /// Normalized SHA-256 of the upstream description
    pub canonical_tool_description_hash: String,

    /// Normalized SHA-256 of the upstream input schema
    pub canonical_tool_input_schema_hash: String,
}

/// A tool in the catalog, exposed as `SERVER__TOOLNAME`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub id: Uuid,

    pub mcp_server_id: Uuid,

    /// `SERVER__TOOLNAME`, exactly one `__`; prefix equals the owning server's name
    pub name: String,

    pub description: String,

    /// JSON-Schema Draft-7
    pub input_schema: serde_json::Value,

    /// User-curated, never overwritten by sync
    pub tags: Vec<String>,

    pub tool_metadata: McpToolMetadata,

    pub embedding: Vec<f32>,
}

/// Fields written by the tool-catalog synchronizer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpToolUpsert {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub tags: Vec<String>,
    pub tool_metadata: McpToolMetadata,
}

impl McpToolUpsert {
    /// Text embedded for semantic tool search
    pub fn embedding_text(&self) -> String {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema,
        })
        .to_string()
    }
}

impl McpTool {
    pub fn as_upsert(&self) -> McpToolUpsert {
        McpToolUpsert {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            tags: self.tags.clone(),
            tool_metadata: self.tool_metadata.clone(),
        }
    }
}

// ============================================================================
// BUNDLES & SESSIONS
// ============================================================================

/// The client-facing addressable unit: `/mcp?bundle_id=...`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerBundle {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub name: String,

    /// Opaque key generated at creation
    pub bundle_key: String,

    /// Ordered; orphan entries are scrubbed asynchronously
    pub mcp_server_configuration_ids: Vec<Uuid>,
}

/// One gateway session multiplexed over N upstream sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSession {
    pub id: Uuid,
    pub bundle_id: Uuid,

    /// server_id -> opaque upstream session id
    pub external_mcp_sessions: HashMap<Uuid, String>,

    pub last_accessed_at: DateTime<Utc>,

    pub deleted: bool,
}

// ============================================================================
// VIRTUAL MCP
// ============================================================================

/// HTTP method for REST virtual tools
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }
}

/// How a virtual tool executes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VirtualMcpToolMetadata {
    Rest {
        method: HttpMethod,
        /// Full URL with `{name}` path placeholders
        endpoint: String,
    },
    Connector,
}

/// A server whose tools execute inside the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMcpServer {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

/// A locally implemented tool presented over MCP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMcpTool {
    pub id: Uuid,
    pub virtual_mcp_server_id: Uuid,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub tool_metadata: VirtualMcpToolMetadata,
}

/// Parsed `x-virtual-mcp-auth-token` header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthTokenData {
    pub location: HttpLocation,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub token: String,
}

impl AuthTokenData {
    /// Token with its prefix applied, e.g. `Bearer abc123`
    pub fn token_with_prefix(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{} {}", prefix, self.token),
            None => self.token.clone(),
        }
    }
}

// ============================================================================
// MCP WIRE TYPES
// ============================================================================

/// Tool definition as serialized to MCP clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Text content item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// A single content item in a tool result
///
/// Only text is produced by the gateway itself; anything else an upstream
/// returns (images, resources) is passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ContentBlock {
    Text(TextContent),
    Other(serde_json::Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(TextContent {
            content_type: "text".to_string(),
            text: text.into(),
        })
    }

    /// Text payload, when this is a text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(content) => Some(&content.text),
            ContentBlock::Other(_) => None,
        }
    }
}

/// Result of a `tools/call`, ours or an upstream's
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    pub fn success(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            structured_content: None,
            is_error: None,
        }
    }

    pub fn error(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            structured_content: None,
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}

// ============================================================================
// NAME GRAMMAR
// ============================================================================

/// Check a server name: `[A-Z0-9_]+` with no `__`
pub fn is_valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && !name.contains("__")
}

/// Check a gateway tool name: `[A-Z0-9_]+__[A-Z0-9_]+` with exactly one `__`
/// and no run of three or more underscores
pub fn is_valid_tool_name(name: &str) -> bool {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return false;
    }
    name.matches("__").count() == 1 && !name.contains("___")
}

/// Split a gateway tool name into (server name, tool suffix)
pub fn split_tool_name(name: &str) -> Option<(&str, &str)> {
    let (server, suffix) = name.split_once("__")?;
    if server.is_empty() || suffix.is_empty() {
        return None;
    }
    Some((server, suffix))
}

/// Generate an opaque bundle key
pub fn generate_bundle_key() -> String {
    use base64::Engine;
    use rand::RngCore;

    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
