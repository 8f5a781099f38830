//! ACI.dev MCP Gateway
//!
//! A multi-tenant MCP (Model Context Protocol) gateway: a JSON-RPC 2.0
//! endpoint that a single AI client connects to, transparently federating
//! calls across many upstream MCP servers. Every bundle exposes exactly two
//! synthetic tools:
//! - `SEARCH_TOOLS`: semantic discovery over the union of permitted upstream
//!   tools
//! - `EXECUTE_TOOL`: dispatch of a chosen tool to its upstream (or to an
//!   in-gateway virtual implementation)
//!
//! # Architecture
//!
//! - Catalog storage (servers, configurations, bundles, tools, accounts,
//!   sessions) behind a trait with in-memory and SQLite backends
//! - Per-bundle session manager multiplexing one client session over N
//!   upstream MCP sessions (streamable-HTTP and SSE)
//! - Credential manager with OAuth2 refresh-and-persist
//! - Tool catalog synchronizer with content-hash diffing and embeddings
//! - Virtual MCP executor for REST and connector tools
//! - Access control by team intersection plus orphan cleanup

// Core modules
pub mod constants;
pub mod error;
pub mod model;

// Gateway components
pub mod access;
pub mod credentials;
pub mod embedding;
pub mod router;
pub mod rpc;
pub mod session;
pub mod sync;
pub mod transport;
pub mod virtual_mcp;

// Infrastructure
pub mod config;
pub mod storage;
pub mod telemetry;

// Interface layers
pub mod cli;
pub mod http;

// Utilities
pub mod utils;

// Re-exports for convenience
pub use error::{GatewayError, Result};
pub use model::{CallToolResult, McpServer, McpServerBundle, McpSession, McpTool};


/// Initialize logging for the application
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "aci_gateway=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
