//! Error types for the gateway
//!
//! This module provides a comprehensive error hierarchy using thiserror.
//! All errors can be converted to GatewayError for unified error handling.

use thiserror::Error;

use crate::constants::{
    JSONRPC_INTERNAL_ERROR, JSONRPC_INVALID_PARAMS, JSONRPC_INVALID_REQUEST,
    JSONRPC_METHOD_NOT_FOUND, JSONRPC_PARSE_ERROR,
};

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Protocol error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Bundle not found: {0}")]
    BundleNotFound(uuid::Uuid),

    #[error("MCP server configuration not found: {0}")]
    ConfigNotFound(uuid::Uuid),

    #[error("MCP server {0} not configured in bundle")]
    ServerNotConfigured(String),

    #[error("MCP tool {0} not found")]
    ToolNotFound(String),

    #[error("MCP tool {0} not enabled")]
    ToolNotEnabled(String),

    #[error("Tool name '{0}' is empty after sanitization")]
    SanitizationEmpty(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Catalog-store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Not found: {entity} '{id}'")]
    NotFound { entity: String, id: String },

    #[error("Connection error: {0}")]
    Connection(String),

    /// One of the §3 unique-name constraints (server, tool, organization)
    /// was violated
    #[error("Duplicate name: {entity} '{name}'")]
    DuplicateName { entity: String, name: String },

    /// The row-locked session merge found its row gone (soft-deleted or
    /// swept between lookup and merge)
    #[error("Session {0} vanished during upstream-session merge")]
    SessionRowVanished(uuid::Uuid),

    #[error("UUID parse error: {0}")]
    UuidParse(#[from] uuid::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err)
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Storage(StorageError::from(err))
    }
}

impl From<uuid::Error> for GatewayError {
    fn from(err: uuid::Error) -> Self {
        GatewayError::Storage(StorageError::UuidParse(err))
    }
}

/// Credential-resolution and token-refresh errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// The configuration's auth type has no matching entry in the server's auth configs
    #[error("no auth config of type {auth_type} on server {server}")]
    ConfigMismatch { server: String, auth_type: String },

    /// No connected account exists for the requested (configuration, ownership, user)
    #[error("no connected account for configuration {0}")]
    NotConnected(uuid::Uuid),

    /// Credentials are expired and cannot be refreshed without user interaction
    #[error("re-authentication required: {0}")]
    ReauthenticationRequired(String),

    /// The token endpoint rejected the refresh request (4xx)
    #[error("token provider rejected refresh: {0}")]
    ProviderRejected(String),

    /// Network failure or 5xx from the token endpoint; retryable
    #[error("transient token refresh failure: {0}")]
    Transient(String),

    #[error("invalid auth token header")]
    InvalidAuthToken,

    #[error("OAuth error: {0}")]
    OAuth(String),
}

impl AuthError {
    /// Stable kind string surfaced in JSON-RPC `error.data.kind`
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::ConfigMismatch { .. } => "ConfigMismatch",
            AuthError::NotConnected(_) => "NotConnected",
            AuthError::ReauthenticationRequired(_) => "ReauthenticationRequired",
            AuthError::ProviderRejected(_) => "CredentialProviderRejected",
            AuthError::Transient(_) => "Transient",
            AuthError::InvalidAuthToken => "InvalidAuthToken",
            AuthError::OAuth(_) => "OAuth",
        }
    }
}

/// Upstream MCP transport errors
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Network failure or 5xx from the upstream; retryable by the caller
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// Unrecoverable upstream failure
    #[error("upstream failure: {0}")]
    Permanent(String),

    /// The upstream expired our session; consumed internally on first occurrence
    #[error("upstream session terminated")]
    SessionTerminated,

    /// JSON-RPC error returned by the upstream tool call
    #[error("upstream MCP error {code}: {message}")]
    Mcp {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// JSON-RPC protocol errors raised while parsing a payload
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        id: Option<serde_json::Value>,
    },

    #[error("method not found: {method}")]
    MethodNotFound {
        method: String,
        id: Option<serde_json::Value>,
    },

    #[error("invalid params: {0}")]
    InvalidParams(String),
}

/// Convenient result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Create a config error
    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GatewayError::Config(msg.into())
    }

    /// Create a validation error
    #[inline]
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        GatewayError::Validation(msg.into())
    }

    /// Create a storage error with a message
    #[inline]
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        GatewayError::Storage(StorageError::Connection(msg.into()))
    }

    /// Create an embedding error
    #[inline]
    pub fn embedding<S: Into<String>>(msg: S) -> Self {
        GatewayError::Embedding(msg.into())
    }

    /// Create a not found error
    #[inline]
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        GatewayError::Storage(StorageError::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    /// Create a duplicate-name error
    #[inline]
    pub fn duplicate_name(entity: impl Into<String>, name: impl Into<String>) -> Self {
        GatewayError::Storage(StorageError::DuplicateName {
            entity: entity.into(),
            name: name.into(),
        })
    }

    /// Create an internal error for unexpected conditions
    #[inline]
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        GatewayError::Internal(msg.into())
    }

    /// JSON-RPC error code for this error
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            GatewayError::Rpc(rpc) => match rpc {
                RpcError::Parse(_) => JSONRPC_PARSE_ERROR,
                RpcError::InvalidRequest { .. } => JSONRPC_INVALID_REQUEST,
                RpcError::MethodNotFound { .. } => JSONRPC_METHOD_NOT_FOUND,
                RpcError::InvalidParams(_) => JSONRPC_INVALID_PARAMS,
            },
            GatewayError::BundleNotFound(_) => JSONRPC_INVALID_REQUEST,
            GatewayError::ConfigNotFound(_)
            | GatewayError::ServerNotConfigured(_)
            | GatewayError::ToolNotFound(_)
            | GatewayError::ToolNotEnabled(_)
            | GatewayError::Validation(_) => JSONRPC_INVALID_PARAMS,
            GatewayError::Upstream(UpstreamError::Mcp { code, .. }) => *code,
            _ => JSONRPC_INTERNAL_ERROR,
        }
    }

    /// JSON-RPC error data for this error, if any
    ///
    /// Auth failures carry a stable `kind` for clients to branch on.
    pub fn jsonrpc_data(&self) -> Option<serde_json::Value> {
        match self {
            GatewayError::Auth(auth) => Some(serde_json::json!({ "kind": auth.kind() })),
            GatewayError::Upstream(UpstreamError::Mcp { data, .. }) => data.clone(),
            _ => None,
        }
    }
}
