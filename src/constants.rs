//! Constants used throughout the gateway
//!
//! This module contains all constant values used by the MCP gateway runtime,
//! including protocol identifiers, header names, and default limits.

// ============================================================================
// MCP PROTOCOL
// ============================================================================

/// MCP protocol version this gateway speaks
pub const SUPPORTED_PROTOCOL_VERSION: &str = "2025-06-18";

/// Name reported in `initialize` responses
pub const GATEWAY_SERVER_NAME: &str = "ACI.dev MCP Gateway";

/// Instructions string returned from `initialize`
pub const GATEWAY_INSTRUCTIONS: &str =
    "use SEARCH_TOOLS and EXECUTE_TOOL to discover and execute tools";

/// Header carrying the MCP protocol version
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Header carrying the gateway (and upstream) session id
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the auth token from the gateway to a virtual MCP server
pub const VIRTUAL_MCP_AUTH_TOKEN_HEADER: &str = "x-virtual-mcp-auth-token";

/// Header carrying the per-request id on all HTTP responses
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// ============================================================================
// SYNTHETIC TOOLS
// ============================================================================

/// Name of the synthetic discovery tool
pub const SEARCH_TOOLS_NAME: &str = "SEARCH_TOOLS";

/// Name of the synthetic dispatch tool
pub const EXECUTE_TOOL_NAME: &str = "EXECUTE_TOOL";

/// Default number of tools returned by SEARCH_TOOLS
pub const SEARCH_TOOLS_DEFAULT_LIMIT: usize = 100;

// ============================================================================
// JSON-RPC ERROR CODES
// ============================================================================

/// Malformed JSON payload
pub const JSONRPC_PARSE_ERROR: i64 = -32700;

/// Payload is valid JSON but not a valid request
pub const JSONRPC_INVALID_REQUEST: i64 = -32600;

/// Unknown method
pub const JSONRPC_METHOD_NOT_FOUND: i64 = -32601;

/// Schema-invalid params
pub const JSONRPC_INVALID_PARAMS: i64 = -32602;

/// Handler failure
pub const JSONRPC_INTERNAL_ERROR: i64 = -32603;

/// Sentinel message upstream streamable-HTTP servers use for expired sessions
pub const SESSION_TERMINATED_MESSAGE: &str = "Session terminated";

// ============================================================================
// TIMEOUTS & LIMITS
// ============================================================================

/// Connect timeout for upstream and virtual-MCP HTTP calls
pub const UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Read timeout for upstream and virtual-MCP HTTP calls
pub const UPSTREAM_READ_TIMEOUT_SECS: u64 = 30;

/// Leeway before OAuth2 token expiry that triggers a refresh
pub const TOKEN_REFRESH_LEEWAY_SECS: i64 = 60;

/// Idle TTL after which a gateway MCP session is treated as expired
pub const SESSION_IDLE_TTL_SECS: i64 = 3600;

/// Dimension of tool and server embeddings
pub const EMBEDDING_DIMENSION: usize = 1024;

/// Embedding model requested from the provider
pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";

// ============================================================================
// ENVIRONMENT & DEFAULTS
// ============================================================================

/// Environment variable: database connection string
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Environment variable: JWT signing key for the MCP endpoint bearer check
pub const ENV_JWT_SIGNING_KEY: &str = "JWT_SIGNING_KEY";

/// Environment variable: embedding provider API key
pub const ENV_EMBEDDING_API_KEY: &str = "EMBEDDING_API_KEY";

/// Environment variable: embedding provider base URL
pub const ENV_EMBEDDING_BASE_URL: &str = "EMBEDDING_BASE_URL";

/// Environment variable: frontend base URL (OAuth redirect construction)
pub const ENV_FRONTEND_BASE_URL: &str = "FRONTEND_BASE_URL";

/// Environment variable: HTTP bind host
pub const ENV_GATEWAY_HOST: &str = "GATEWAY_HOST";

/// Environment variable: HTTP bind port
pub const ENV_GATEWAY_PORT: &str = "GATEWAY_PORT";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Default embedding provider base URL
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.openai.com/v1";

/// Storage driver: SQLite
pub const STORAGE_DRIVER_SQLITE: &str = "sqlite";

/// Storage driver: in-memory
pub const STORAGE_DRIVER_MEMORY: &str = "memory";
