//! Storage backends for the gateway catalog
//!
//! Provides multiple storage backends with a unified trait interface. The
//! trait is split along the gateway's seams: identity (the external identity
//! store the core consumes), catalog, accounts, bundles, sessions and
//! virtual MCP.

pub mod memory;
pub mod sql_common;
pub mod sqlite;

use crate::{Result, model::*};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// User / organization / team membership queries (external identity store)
#[async_trait]
pub trait IdentityStorage: Send + Sync {
    /// Create an organization
    async fn create_organization(&self, organization: &Organization) -> Result<()>;

    /// Get an organization by ID
    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>>;

    /// Create a user
    async fn create_user(&self, user: &User) -> Result<()>;

    /// Get a user by ID
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    /// Create a team
    async fn create_team(&self, team: &Team) -> Result<()>;

    /// Add a user to a team
    async fn add_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<()>;

    /// Remove a user from a team
    async fn remove_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<()>;

    /// Teams of a user within an organization
    async fn get_teams_by_user(&self, organization_id: Uuid, user_id: Uuid) -> Result<Vec<Team>>;
}

/// Servers, tools and the vector index
#[async_trait]
pub trait CatalogStorage: Send + Sync {
    /// Create an MCP server
    async fn create_server(&self, server: &McpServer) -> Result<()>;

    /// Get a server by ID
    async fn get_server(&self, id: Uuid) -> Result<Option<McpServer>>;

    /// Get a server by its globally unique name
    async fn get_server_by_name(&self, name: &str) -> Result<Option<McpServer>>;

    /// Stamp `last_synced_at`
    async fn update_server_last_synced_at(
        &self,
        server_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete a server, cascading to configurations, connected accounts and tools
    async fn delete_server(&self, id: Uuid) -> Result<()>;

    /// Get a tool by gateway name
    async fn get_tool_by_name(&self, name: &str) -> Result<Option<McpTool>>;

    /// All tools of a server
    async fn get_tools_by_server(&self, server_id: Uuid) -> Result<Vec<McpTool>>;

    /// Batch-create tools for a server; embeddings are parallel to the upserts
    async fn create_tools(
        &self,
        server_id: Uuid,
        tools: &[McpToolUpsert],
        embeddings: &[Vec<f32>],
    ) -> Result<()>;

    /// Batch-update tools by name; the embedding column is written only when
    /// a vector is supplied. Tool ids are preserved.
    async fn update_tools(
        &self,
        tools: &[McpToolUpsert],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<()>;

    /// Batch-delete tools by gateway name
    async fn delete_tools_by_names(&self, names: &[String]) -> Result<()>;

    /// Tool search restricted to `allowed_server_ids`, excluding
    /// `disabled_tool_ids`; ordered by cosine distance ascending when a query
    /// vector is given, else by name
    async fn search_tools(
        &self,
        allowed_server_ids: &[Uuid],
        disabled_tool_ids: &[Uuid],
        query_vector: Option<&[f32]>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<McpTool>>;
}

/// Configurations and connected accounts
#[async_trait]
pub trait AccountStorage: Send + Sync {
    /// Create a configuration
    async fn create_configuration(&self, configuration: &McpServerConfiguration) -> Result<()>;

    /// Get a configuration by ID
    async fn get_configuration(&self, id: Uuid) -> Result<Option<McpServerConfiguration>>;

    /// All configurations of a server
    async fn get_configurations_by_server(
        &self,
        server_id: Uuid,
    ) -> Result<Vec<McpServerConfiguration>>;

    /// The operational configuration of a server, if any
    async fn get_operational_configuration(
        &self,
        server_id: Uuid,
    ) -> Result<Option<McpServerConfiguration>>;

    /// Replace a configuration's allowed teams
    async fn update_configuration_allowed_teams(
        &self,
        configuration_id: Uuid,
        allowed_teams: &std::collections::HashSet<Uuid>,
    ) -> Result<()>;

    /// Delete a configuration, cascading to its connected accounts
    async fn delete_configuration(&self, id: Uuid) -> Result<()>;

    /// Create a connected account
    async fn create_connected_account(&self, account: &ConnectedAccount) -> Result<()>;

    /// Select a connected account by ownership; `user_id` applies to
    /// individual ownership only
    async fn get_connected_account(
        &self,
        configuration_id: Uuid,
        ownership: ConnectedAccountOwnership,
        user_id: Option<Uuid>,
    ) -> Result<Option<ConnectedAccount>>;

    /// All connected accounts of a configuration
    async fn get_connected_accounts_by_configuration(
        &self,
        configuration_id: Uuid,
    ) -> Result<Vec<ConnectedAccount>>;

    /// All connected accounts of a user
    async fn get_connected_accounts_by_user(&self, user_id: Uuid)
    -> Result<Vec<ConnectedAccount>>;

    /// Atomically replace an account's credentials
    async fn update_connected_account_credentials(
        &self,
        account_id: Uuid,
        credentials: &AuthCredentials,
    ) -> Result<()>;

    /// Delete a connected account; no-op when absent
    async fn delete_connected_account(&self, id: Uuid) -> Result<()>;
}

/// Bundles
#[async_trait]
pub trait BundleStorage: Send + Sync {
    /// Create a bundle
    async fn create_bundle(&self, bundle: &McpServerBundle) -> Result<()>;

    /// Get a bundle by ID
    async fn get_bundle(&self, id: Uuid) -> Result<Option<McpServerBundle>>;

    /// All bundles of an organization
    async fn get_bundles_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<McpServerBundle>>;

    /// Bundles of an organization whose configuration list contains the id
    async fn get_bundles_containing_configuration(
        &self,
        organization_id: Uuid,
        configuration_id: Uuid,
    ) -> Result<Vec<McpServerBundle>>;

    /// Bundles of a user within an organization
    async fn get_bundles_by_user(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Vec<McpServerBundle>>;

    /// Replace a bundle's ordered configuration-id list
    async fn update_bundle_configuration_ids(
        &self,
        bundle_id: Uuid,
        configuration_ids: &[Uuid],
    ) -> Result<()>;
}

/// Gateway MCP sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Create a session row
    async fn create_session(&self, session: &McpSession) -> Result<()>;

    /// Get a session; soft-deleted rows are returned only when asked for
    async fn get_session(&self, id: Uuid, include_deleted: bool) -> Result<Option<McpSession>>;

    /// Update `last_accessed_at`
    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Replace the whole upstream-session map (initialize fan-out)
    async fn set_session_external_mcp_sessions(
        &self,
        id: Uuid,
        external_mcp_sessions: &std::collections::HashMap<Uuid, String>,
    ) -> Result<()>;

    /// Merge one upstream session id into the map. Must read-modify-write
    /// against the latest persisted value under a row lock so concurrent
    /// upstream calls on the same gateway session do not overwrite each
    /// other's entries.
    async fn update_session_external_mcp_session(
        &self,
        id: Uuid,
        server_id: Uuid,
        upstream_session_id: &str,
    ) -> Result<()>;

    /// Soft-delete a session
    async fn delete_session(&self, id: Uuid) -> Result<()>;

    /// Soft-delete sessions idle since before `cutoff`; returns the count
    async fn sweep_expired_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Virtual MCP servers and tools
#[async_trait]
pub trait VirtualMcpStorage: Send + Sync {
    /// Create a virtual server
    async fn create_virtual_server(&self, server: &VirtualMcpServer) -> Result<()>;

    /// Get a virtual server by name
    async fn get_virtual_server_by_name(&self, name: &str) -> Result<Option<VirtualMcpServer>>;

    /// Get a virtual tool by name
    async fn get_virtual_tool_by_name(&self, name: &str) -> Result<Option<VirtualMcpTool>>;

    /// All tools of a virtual server
    async fn get_virtual_tools_by_server(&self, server_id: Uuid) -> Result<Vec<VirtualMcpTool>>;

    /// Batch-create virtual tools
    async fn create_virtual_tools(&self, tools: &[VirtualMcpTool]) -> Result<()>;
}

/// Unified storage trait for persisting all gateway state
pub trait Storage:
    IdentityStorage
    + CatalogStorage
    + AccountStorage
    + BundleStorage
    + SessionStorage
    + VirtualMcpStorage
{
}

impl<T> Storage for T where
    T: IdentityStorage
        + CatalogStorage
        + AccountStorage
        + BundleStorage
        + SessionStorage
        + VirtualMcpStorage
{
}

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Create a storage backend from configuration
pub async fn create_storage_from_config(
    config: &crate::config::StorageConfig,
) -> Result<Arc<dyn Storage>> {
    match config.driver.as_str() {
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        "sqlite" => Ok(Arc::new(SqliteStorage::new(&config.dsn).await?)),
        _ => Err(crate::GatewayError::config(format!(
            "Unknown storage driver: {}. Supported: memory, sqlite",
            config.driver
        ))),
    }
}

/// Cosine distance between two vectors (1 - cosine similarity)
///
/// Mismatched or zero-magnitude vectors sort last.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::MAX;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return f32::MAX;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod memory_test;
#[cfg(test)]
mod sqlite_test;
#[cfg(test)]
mod storage_test;
