//! In-memory storage implementation
//!
//! Fast, non-persistent storage for development and testing. Uses DashMap
//! for lock-free concurrent access.
//!
//! **WARNING:** MemoryStorage is NOT recommended for production use:
//! - Data is lost on process restart
//! - Does not coordinate state across multiple process instances
//!
//! For production deployments, use SqliteStorage.

use super::*;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

/// In-memory storage implementation backed by DashMap
#[derive(Clone, Default)]
pub struct MemoryStorage {
    organizations: Arc<DashMap<Uuid, Organization>>,
    users: Arc<DashMap<Uuid, User>>,
    teams: Arc<DashMap<Uuid, Team>>,
    /// team_id -> member user ids
    team_members: Arc<DashMap<Uuid, HashSet<Uuid>>>,
    servers: Arc<DashMap<Uuid, McpServer>>,
    tools: Arc<DashMap<Uuid, McpTool>>,
    configurations: Arc<DashMap<Uuid, McpServerConfiguration>>,
    connected_accounts: Arc<DashMap<Uuid, ConnectedAccount>>,
    bundles: Arc<DashMap<Uuid, McpServerBundle>>,
    sessions: Arc<DashMap<Uuid, McpSession>>,
    virtual_servers: Arc<DashMap<Uuid, VirtualMcpServer>>,
    virtual_tools: Arc<DashMap<Uuid, VirtualMcpTool>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStorage for MemoryStorage {
    async fn create_organization(&self, organization: &Organization) -> Result<()> {
        self.organizations
            .insert(organization.id, organization.clone());
        Ok(())
    }

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        Ok(self.organizations.get(&id).map(|o| o.clone()))
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn create_team(&self, team: &Team) -> Result<()> {
        self.teams.insert(team.id, team.clone());
        Ok(())
    }

    async fn add_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<()> {
        self.team_members.entry(team_id).or_default().insert(user_id);
        Ok(())
    }

    async fn remove_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<()> {
        if let Some(mut members) = self.team_members.get_mut(&team_id) {
            members.remove(&user_id);
        }
        Ok(())
    }

    async fn get_teams_by_user(&self, organization_id: Uuid, user_id: Uuid) -> Result<Vec<Team>> {
        let mut teams: Vec<Team> = self
            .teams
            .iter()
            .filter(|t| t.organization_id == organization_id)
            .filter(|t| {
                self.team_members
                    .get(&t.id)
                    .is_some_and(|members| members.contains(&user_id))
            })
            .map(|t| t.clone())
            .collect();
        teams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(teams)
    }
}

#[async_trait]
impl CatalogStorage for MemoryStorage {
    async fn create_server(&self, server: &McpServer) -> Result<()> {
        if !is_valid_server_name(&server.name) {
            return Err(crate::GatewayError::validation(format!(
                "invalid server name '{}'",
                server.name
            )));
        }
        let duplicate = self.servers.iter().any(|s| s.name == server.name);
        if duplicate {
            return Err(crate::GatewayError::duplicate_name(
                "mcp_server",
                server.name.clone(),
            ));
        }
        self.servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn get_server(&self, id: Uuid) -> Result<Option<McpServer>> {
        Ok(self.servers.get(&id).map(|s| s.clone()))
    }

    async fn get_server_by_name(&self, name: &str) -> Result<Option<McpServer>> {
        Ok(self
            .servers
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.clone()))
    }

    async fn update_server_last_synced_at(
        &self,
        server_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or_else(|| crate::GatewayError::not_found("mcp_server", server_id.to_string()))?;
        server.last_synced_at = Some(at);
        Ok(())
    }

    async fn delete_server(&self, id: Uuid) -> Result<()> {
        self.servers.remove(&id);

        // cascade: tools
        let tool_ids: Vec<Uuid> = self
            .tools
            .iter()
            .filter(|t| t.mcp_server_id == id)
            .map(|t| t.id)
            .collect();
        for tool_id in tool_ids {
            self.tools.remove(&tool_id);
        }

        // cascade: configurations -> connected accounts
        let configuration_ids: Vec<Uuid> = self
            .configurations
            .iter()
            .filter(|c| c.mcp_server_id == id)
            .map(|c| c.id)
            .collect();
        for configuration_id in configuration_ids {
            self.delete_configuration(configuration_id).await?;
        }
        Ok(())
    }

    async fn get_tool_by_name(&self, name: &str) -> Result<Option<McpTool>> {
        Ok(self.tools.iter().find(|t| t.name == name).map(|t| t.clone()))
    }

    async fn get_tools_by_server(&self, server_id: Uuid) -> Result<Vec<McpTool>> {
        let mut tools: Vec<McpTool> = self
            .tools
            .iter()
            .filter(|t| t.mcp_server_id == server_id)
            .map(|t| t.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    async fn create_tools(
        &self,
        server_id: Uuid,
        tools: &[McpToolUpsert],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        if tools.len() != embeddings.len() {
            return Err(crate::GatewayError::internal(
                "tool/embedding batch length mismatch",
            ));
        }
        for (upsert, embedding) in tools.iter().zip(embeddings.iter()) {
            if !is_valid_tool_name(&upsert.name) {
                return Err(crate::GatewayError::validation(format!(
                    "invalid tool name '{}'",
                    upsert.name
                )));
            }
            let tool = McpTool {
                id: Uuid::new_v4(),
                mcp_server_id: server_id,
                name: upsert.name.clone(),
                description: upsert.description.clone(),
                input_schema: upsert.input_schema.clone(),
                tags: upsert.tags.clone(),
                tool_metadata: upsert.tool_metadata.clone(),
                embedding: embedding.clone(),
            };
            self.tools.insert(tool.id, tool);
        }
        Ok(())
    }

    async fn update_tools(
        &self,
        tools: &[McpToolUpsert],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<()> {
        if tools.len() != embeddings.len() {
            return Err(crate::GatewayError::internal(
                "tool/embedding batch length mismatch",
            ));
        }
        for (upsert, embedding) in tools.iter().zip(embeddings.iter()) {
            let existing_id = self
                .tools
                .iter()
                .find(|t| t.name == upsert.name)
                .map(|t| t.id)
                .ok_or_else(|| crate::GatewayError::not_found("mcp_tool", upsert.name.clone()))?;
            let mut tool = self
                .tools
                .get_mut(&existing_id)
                .ok_or_else(|| crate::GatewayError::not_found("mcp_tool", upsert.name.clone()))?;
            tool.description = upsert.description.clone();
            tool.input_schema = upsert.input_schema.clone();
            tool.tags = upsert.tags.clone();
            tool.tool_metadata = upsert.tool_metadata.clone();
            if let Some(vector) = embedding {
                tool.embedding = vector.clone();
            }
        }
        Ok(())
    }

    async fn delete_tools_by_names(&self, names: &[String]) -> Result<()> {
        for name in names {
            let id = self.tools.iter().find(|t| &t.name == name).map(|t| t.id);
            if let Some(id) = id {
                self.tools.remove(&id);
            }
        }
        Ok(())
    }

    async fn search_tools(
        &self,
        allowed_server_ids: &[Uuid],
        disabled_tool_ids: &[Uuid],
        query_vector: Option<&[f32]>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<McpTool>> {
        let allowed: HashSet<&Uuid> = allowed_server_ids.iter().collect();
        let disabled: HashSet<&Uuid> = disabled_tool_ids.iter().collect();

        let mut tools: Vec<McpTool> = self
            .tools
            .iter()
            .filter(|t| allowed.contains(&t.mcp_server_id) && !disabled.contains(&t.id))
            .map(|t| t.clone())
            .collect();

        match query_vector {
            Some(vector) => {
                tools.sort_by(|a, b| {
                    let da = cosine_distance(&a.embedding, vector);
                    let db = cosine_distance(&b.embedding, vector);
                    da.partial_cmp(&db)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.name.cmp(&b.name))
                });
            }
            None => tools.sort_by(|a, b| a.name.cmp(&b.name)),
        }

        Ok(tools.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl AccountStorage for MemoryStorage {
    async fn create_configuration(&self, configuration: &McpServerConfiguration) -> Result<()> {
        self.configurations
            .insert(configuration.id, configuration.clone());
        Ok(())
    }

    async fn get_configuration(&self, id: Uuid) -> Result<Option<McpServerConfiguration>> {
        Ok(self.configurations.get(&id).map(|c| c.clone()))
    }

    async fn get_configurations_by_server(
        &self,
        server_id: Uuid,
    ) -> Result<Vec<McpServerConfiguration>> {
        Ok(self
            .configurations
            .iter()
            .filter(|c| c.mcp_server_id == server_id)
            .map(|c| c.clone())
            .collect())
    }

    async fn get_operational_configuration(
        &self,
        server_id: Uuid,
    ) -> Result<Option<McpServerConfiguration>> {
        Ok(self
            .configurations
            .iter()
            .find(|c| {
                c.mcp_server_id == server_id
                    && c.connected_account_ownership == ConnectedAccountOwnership::Operational
            })
            .map(|c| c.clone()))
    }

    async fn update_configuration_allowed_teams(
        &self,
        configuration_id: Uuid,
        allowed_teams: &HashSet<Uuid>,
    ) -> Result<()> {
        let mut configuration = self.configurations.get_mut(&configuration_id).ok_or_else(|| {
            crate::GatewayError::not_found("mcp_server_configuration", configuration_id.to_string())
        })?;
        configuration.allowed_teams = allowed_teams.clone();
        Ok(())
    }

    async fn delete_configuration(&self, id: Uuid) -> Result<()> {
        self.configurations.remove(&id);
        // cascade: connected accounts
        let account_ids: Vec<Uuid> = self
            .connected_accounts
            .iter()
            .filter(|a| a.mcp_server_configuration_id == id)
            .map(|a| a.id)
            .collect();
        for account_id in account_ids {
            self.connected_accounts.remove(&account_id);
        }
        Ok(())
    }

    async fn create_connected_account(&self, account: &ConnectedAccount) -> Result<()> {
        self.connected_accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_connected_account(
        &self,
        configuration_id: Uuid,
        ownership: ConnectedAccountOwnership,
        user_id: Option<Uuid>,
    ) -> Result<Option<ConnectedAccount>> {
        Ok(self
            .connected_accounts
            .iter()
            .find(|a| {
                a.mcp_server_configuration_id == configuration_id
                    && a.ownership == ownership
                    && (ownership != ConnectedAccountOwnership::Individual
                        || a.user_id == user_id)
            })
            .map(|a| a.clone()))
    }

    async fn get_connected_accounts_by_configuration(
        &self,
        configuration_id: Uuid,
    ) -> Result<Vec<ConnectedAccount>> {
        Ok(self
            .connected_accounts
            .iter()
            .filter(|a| a.mcp_server_configuration_id == configuration_id)
            .map(|a| a.clone())
            .collect())
    }

    async fn get_connected_accounts_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConnectedAccount>> {
        Ok(self
            .connected_accounts
            .iter()
            .filter(|a| a.user_id == Some(user_id))
            .map(|a| a.clone())
            .collect())
    }

    async fn update_connected_account_credentials(
        &self,
        account_id: Uuid,
        credentials: &AuthCredentials,
    ) -> Result<()> {
        let mut account = self.connected_accounts.get_mut(&account_id).ok_or_else(|| {
            crate::GatewayError::not_found("connected_account", account_id.to_string())
        })?;
        account.auth_credentials = credentials.clone();
        Ok(())
    }

    async fn delete_connected_account(&self, id: Uuid) -> Result<()> {
        self.connected_accounts.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl BundleStorage for MemoryStorage {
    async fn create_bundle(&self, bundle: &McpServerBundle) -> Result<()> {
        self.bundles.insert(bundle.id, bundle.clone());
        Ok(())
    }

    async fn get_bundle(&self, id: Uuid) -> Result<Option<McpServerBundle>> {
        Ok(self.bundles.get(&id).map(|b| b.clone()))
    }

    async fn get_bundles_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<McpServerBundle>> {
        Ok(self
            .bundles
            .iter()
            .filter(|b| b.organization_id == organization_id)
            .map(|b| b.clone())
            .collect())
    }

    async fn get_bundles_containing_configuration(
        &self,
        organization_id: Uuid,
        configuration_id: Uuid,
    ) -> Result<Vec<McpServerBundle>> {
        Ok(self
            .bundles
            .iter()
            .filter(|b| {
                b.organization_id == organization_id
                    && b.mcp_server_configuration_ids.contains(&configuration_id)
            })
            .map(|b| b.clone())
            .collect())
    }

    async fn get_bundles_by_user(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Vec<McpServerBundle>> {
        Ok(self
            .bundles
            .iter()
            .filter(|b| b.user_id == user_id && b.organization_id == organization_id)
            .map(|b| b.clone())
            .collect())
    }

    async fn update_bundle_configuration_ids(
        &self,
        bundle_id: Uuid,
        configuration_ids: &[Uuid],
    ) -> Result<()> {
        let mut bundle = self
            .bundles
            .get_mut(&bundle_id)
            .ok_or_else(|| crate::GatewayError::not_found("mcp_server_bundle", bundle_id.to_string()))?;
        bundle.mcp_server_configuration_ids = configuration_ids.to_vec();
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn create_session(&self, session: &McpSession) -> Result<()> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid, include_deleted: bool) -> Result<Option<McpSession>> {
        Ok(self
            .sessions
            .get(&id)
            .filter(|s| include_deleted || !s.deleted)
            .map(|s| s.clone()))
    }

    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.last_accessed_at = at;
        }
        Ok(())
    }

    async fn set_session_external_mcp_sessions(
        &self,
        id: Uuid,
        external_mcp_sessions: &HashMap<Uuid, String>,
    ) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| crate::GatewayError::not_found("mcp_session", id.to_string()))?;
        session.external_mcp_sessions = external_mcp_sessions.clone();
        Ok(())
    }

    async fn update_session_external_mcp_session(
        &self,
        id: Uuid,
        server_id: Uuid,
        upstream_session_id: &str,
    ) -> Result<()> {
        // get_mut holds the shard lock for the whole read-modify-write,
        // which is the in-memory equivalent of the sqlite row lock
        let mut session = self.sessions.get_mut(&id).ok_or(crate::GatewayError::Storage(
            crate::error::StorageError::SessionRowVanished(id),
        ))?;
        session
            .external_mcp_sessions
            .insert(server_id, upstream_session_id.to_string());
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.deleted = true;
        }
        Ok(())
    }

    async fn sweep_expired_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut swept = 0u64;
        for mut entry in self.sessions.iter_mut() {
            if !entry.deleted && entry.last_accessed_at < cutoff {
                entry.deleted = true;
                swept += 1;
            }
        }
        Ok(swept)
    }
}

#[async_trait]
impl VirtualMcpStorage for MemoryStorage {
    async fn create_virtual_server(&self, server: &VirtualMcpServer) -> Result<()> {
        self.virtual_servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn get_virtual_server_by_name(&self, name: &str) -> Result<Option<VirtualMcpServer>> {
        Ok(self
            .virtual_servers
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.clone()))
    }

    async fn get_virtual_tool_by_name(&self, name: &str) -> Result<Option<VirtualMcpTool>> {
        Ok(self
            .virtual_tools
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.clone()))
    }

    async fn get_virtual_tools_by_server(&self, server_id: Uuid) -> Result<Vec<VirtualMcpTool>> {
        let mut tools: Vec<VirtualMcpTool> = self
            .virtual_tools
            .iter()
            .filter(|t| t.virtual_mcp_server_id == server_id)
            .map(|t| t.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    async fn create_virtual_tools(&self, tools: &[VirtualMcpTool]) -> Result<()> {
        for tool in tools {
            self.virtual_tools.insert(tool.id, tool.clone());
        }
        Ok(())
    }
}
