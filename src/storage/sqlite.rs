//! SQLite storage implementation
//!
//! Persistent catalog store. Embeddings are stored as JSON arrays and
//! cosine distance is computed in-process after the candidate rows are
//! filtered by server id (SQLite has no vector type).

use crate::model::*;
use crate::storage::{
    AccountStorage, BundleStorage, CatalogStorage, IdentityStorage, SessionStorage,
    VirtualMcpStorage, cosine_distance, sql_common::*,
};
use crate::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// How long a writer waits for the row lock before giving up. The only
/// contended row in the hot path is the session's upstream-id map; a
/// concurrent merge holds it for one read-modify-write.
const WRITE_LOCK_WAIT: Duration = Duration::from_secs(5);

/// SQLite storage backend
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage
    ///
    /// # Arguments
    /// * `dsn` - Database path (e.g., ".gateway/catalog.db" or ":memory:" for in-memory)
    pub async fn new(dsn: &str) -> Result<Self> {
        let path = dsn.strip_prefix("sqlite:").unwrap_or(dsn);
        let in_memory = path == ":memory:";

        if !in_memory
            && let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))
            .map_err(|e| GatewayError::storage(format!("invalid sqlite dsn '{}': {}", dsn, e)))?
            .create_if_missing(true)
            // WAL lets catalog reads proceed while a session-merge
            // transaction holds the write lock; the busy timeout makes the
            // losing merge wait its turn instead of failing with SQLITE_BUSY
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(WRITE_LOCK_WAIT)
            // cascade deletes (server -> configurations -> accounts, tools)
            // are FK constraints; enforced on every pooled connection
            .foreign_keys(true);

        // pooled connections to an in-memory database would each get their
        // own private copy; pin the pool to a single connection there
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .map_err(|e| GatewayError::storage(format!("Failed to connect to SQLite: {}", e)))?;

        sqlx::migrate!("./migrations/sqlite")
            .run(&pool)
            .await
            .map_err(|e| GatewayError::storage(format!("Failed to run migrations: {}", e)))?;

        Ok(Self { pool })
    }

    fn parse_server(row: &SqliteRow) -> Result<McpServer> {
        Ok(McpServer {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            transport: parse_transport(&row.try_get::<String, _>("transport")?),
            description: row.try_get("description")?,
            categories: serde_json::from_str(&row.try_get::<String, _>("categories")?)?,
            auth_configs: serde_json::from_str(&row.try_get::<String, _>("auth_configs")?)?,
            server_metadata: serde_json::from_str(&row.try_get::<String, _>("server_metadata")?)?,
            organization_id: row
                .try_get::<Option<String>, _>("organization_id")?
                .map(|s| Uuid::parse_str(&s))
                .transpose()?,
            last_synced_at: row
                .try_get::<Option<i64>, _>("last_synced_at")?
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            embedding: parse_embedding(&row.try_get::<String, _>("embedding")?)?,
        })
    }

    fn parse_tool(row: &SqliteRow) -> Result<McpTool> {
        Ok(McpTool {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            mcp_server_id: Uuid::parse_str(&row.try_get::<String, _>("mcp_server_id")?)?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            input_schema: serde_json::from_str(&row.try_get::<String, _>("input_schema")?)?,
            tags: serde_json::from_str(&row.try_get::<String, _>("tags")?)?,
            tool_metadata: serde_json::from_str(&row.try_get::<String, _>("tool_metadata")?)?,
            embedding: parse_embedding(&row.try_get::<String, _>("embedding")?)?,
        })
    }

    fn parse_configuration(row: &SqliteRow) -> Result<McpServerConfiguration> {
        Ok(McpServerConfiguration {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            organization_id: Uuid::parse_str(&row.try_get::<String, _>("organization_id")?)?,
            mcp_server_id: Uuid::parse_str(&row.try_get::<String, _>("mcp_server_id")?)?,
            name: row.try_get("name")?,
            auth_type: parse_auth_type(&row.try_get::<String, _>("auth_type")?),
            connected_account_ownership: parse_ownership(
                &row.try_get::<String, _>("connected_account_ownership")?,
            ),
            all_tools_enabled: row.try_get::<i64, _>("all_tools_enabled")? != 0,
            enabled_tools: parse_uuid_set(&row.try_get::<String, _>("enabled_tools")?)?,
            allowed_teams: parse_uuid_set(&row.try_get::<String, _>("allowed_teams")?)?,
        })
    }

    fn parse_connected_account(row: &SqliteRow) -> Result<ConnectedAccount> {
        Ok(ConnectedAccount {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            user_id: row
                .try_get::<Option<String>, _>("user_id")?
                .map(|s| Uuid::parse_str(&s))
                .transpose()?,
            mcp_server_configuration_id: Uuid::parse_str(
                &row.try_get::<String, _>("mcp_server_configuration_id")?,
            )?,
            ownership: parse_ownership(&row.try_get::<String, _>("ownership")?),
            auth_credentials: serde_json::from_str(
                &row.try_get::<String, _>("auth_credentials")?,
            )?,
        })
    }

    fn parse_bundle(row: &SqliteRow) -> Result<McpServerBundle> {
        Ok(McpServerBundle {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            user_id: Uuid::parse_str(&row.try_get::<String, _>("user_id")?)?,
            organization_id: Uuid::parse_str(&row.try_get::<String, _>("organization_id")?)?,
            name: row.try_get("name")?,
            bundle_key: row.try_get("bundle_key")?,
            mcp_server_configuration_ids: parse_uuid_list(
                &row.try_get::<String, _>("mcp_server_configuration_ids")?,
            )?,
        })
    }

    fn parse_session(row: &SqliteRow) -> Result<McpSession> {
        Ok(McpSession {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            bundle_id: Uuid::parse_str(&row.try_get::<String, _>("bundle_id")?)?,
            external_mcp_sessions: parse_session_map(
                &row.try_get::<String, _>("external_mcp_sessions")?,
            )?,
            last_accessed_at: DateTime::from_timestamp(row.try_get("last_accessed_at")?, 0)
                .unwrap_or_else(Utc::now),
            deleted: row.try_get::<i64, _>("deleted")? != 0,
        })
    }

    fn parse_virtual_tool(row: &SqliteRow) -> Result<VirtualMcpTool> {
        Ok(VirtualMcpTool {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            virtual_mcp_server_id: Uuid::parse_str(
                &row.try_get::<String, _>("virtual_mcp_server_id")?,
            )?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            input_schema: serde_json::from_str(&row.try_get::<String, _>("input_schema")?)?,
            tool_metadata: serde_json::from_str(&row.try_get::<String, _>("tool_metadata")?)?,
        })
    }
}

#[async_trait]
impl IdentityStorage for SqliteStorage {
    async fn create_organization(&self, organization: &Organization) -> Result<()> {
        sqlx::query(
            "INSERT INTO organizations (id, name, description, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(organization.id.to_string())
        .bind(&organization.name)
        .bind(&organization.description)
        .bind(organization.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        let row = sqlx::query(
            "SELECT id, name, description, created_at FROM organizations WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Organization {
                id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                created_at: DateTime::from_timestamp(row.try_get("created_at")?, 0)
                    .unwrap_or_else(Utc::now),
            })),
            None => Ok(None),
        }
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, name, email, email_verified, identity_provider, password_hash)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.email_verified as i64)
        .bind(identity_provider_to_str(user.identity_provider))
        .bind(&user.password_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, email, email_verified, identity_provider, password_hash
             FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(User {
                id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                email_verified: row.try_get::<i64, _>("email_verified")? != 0,
                identity_provider: parse_identity_provider(
                    &row.try_get::<String, _>("identity_provider")?,
                ),
                password_hash: row.try_get("password_hash")?,
            })),
            None => Ok(None),
        }
    }

    async fn create_team(&self, team: &Team) -> Result<()> {
        sqlx::query("INSERT INTO teams (id, organization_id, name) VALUES (?, ?, ?)")
            .bind(team.id.to_string())
            .bind(team.organization_id.to_string())
            .bind(&team.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO team_members (team_id, user_id) VALUES (?, ?)
             ON CONFLICT(team_id, user_id) DO NOTHING",
        )
        .bind(team_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM team_members WHERE team_id = ? AND user_id = ?")
            .bind(team_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_teams_by_user(&self, organization_id: Uuid, user_id: Uuid) -> Result<Vec<Team>> {
        let rows = sqlx::query(
            "SELECT t.id, t.organization_id, t.name
             FROM teams t
             JOIN team_members tm ON tm.team_id = t.id
             WHERE t.organization_id = ? AND tm.user_id = ?
             ORDER BY t.name",
        )
        .bind(organization_id.to_string())
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut teams = Vec::with_capacity(rows.len());
        for row in rows {
            teams.push(Team {
                id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
                organization_id: Uuid::parse_str(&row.try_get::<String, _>("organization_id")?)?,
                name: row.try_get("name")?,
            });
        }
        Ok(teams)
    }
}

#[async_trait]
impl CatalogStorage for SqliteStorage {
    async fn create_server(&self, server: &McpServer) -> Result<()> {
        if !is_valid_server_name(&server.name) {
            return Err(GatewayError::validation(format!(
                "invalid server name '{}'",
                server.name
            )));
        }
        sqlx::query(
            "INSERT INTO mcp_servers
                (id, name, url, transport, description, categories, auth_configs,
                 server_metadata, organization_id, last_synced_at, embedding)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(server.id.to_string())
        .bind(&server.name)
        .bind(&server.url)
        .bind(transport_to_str(server.transport))
        .bind(&server.description)
        .bind(serde_json::to_string(&server.categories)?)
        .bind(serde_json::to_string(&server.auth_configs)?)
        .bind(serde_json::to_string(&server.server_metadata)?)
        .bind(server.organization_id.map(|id| id.to_string()))
        .bind(server.last_synced_at.map(|dt| dt.timestamp()))
        .bind(embedding_to_json(&server.embedding)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                GatewayError::duplicate_name("mcp_server", server.name.clone())
            } else {
                GatewayError::from(e)
            }
        })?;
        Ok(())
    }

    async fn get_server(&self, id: Uuid) -> Result<Option<McpServer>> {
        let row = sqlx::query("SELECT * FROM mcp_servers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::parse_server(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_server_by_name(&self, name: &str) -> Result<Option<McpServer>> {
        let row = sqlx::query("SELECT * FROM mcp_servers WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::parse_server(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_server_last_synced_at(
        &self,
        server_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE mcp_servers SET last_synced_at = ? WHERE id = ?")
            .bind(at.timestamp())
            .bind(server_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_server(&self, id: Uuid) -> Result<()> {
        // FK cascade removes tools, configurations and connected accounts
        sqlx::query("DELETE FROM mcp_servers WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_tool_by_name(&self, name: &str) -> Result<Option<McpTool>> {
        let row = sqlx::query("SELECT * FROM mcp_tools WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::parse_tool(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_tools_by_server(&self, server_id: Uuid) -> Result<Vec<McpTool>> {
        let rows = sqlx::query("SELECT * FROM mcp_tools WHERE mcp_server_id = ? ORDER BY name")
            .bind(server_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut tools = Vec::with_capacity(rows.len());
        for row in rows {
            tools.push(Self::parse_tool(&row)?);
        }
        Ok(tools)
    }

    async fn create_tools(
        &self,
        server_id: Uuid,
        tools: &[McpToolUpsert],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        if tools.len() != embeddings.len() {
            return Err(GatewayError::internal(
                "tool/embedding batch length mismatch",
            ));
        }
        let mut tx = self.pool.begin().await?;
        for (upsert, embedding) in tools.iter().zip(embeddings.iter()) {
            if !is_valid_tool_name(&upsert.name) {
                tx.rollback().await?;
                return Err(GatewayError::validation(format!(
                    "invalid tool name '{}'",
                    upsert.name
                )));
            }
            sqlx::query(
                "INSERT INTO mcp_tools
                    (id, mcp_server_id, name, description, input_schema, tags,
                     tool_metadata, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(server_id.to_string())
            .bind(&upsert.name)
            .bind(&upsert.description)
            .bind(serde_json::to_string(&upsert.input_schema)?)
            .bind(serde_json::to_string(&upsert.tags)?)
            .bind(serde_json::to_string(&upsert.tool_metadata)?)
            .bind(embedding_to_json(embedding)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_tools(
        &self,
        tools: &[McpToolUpsert],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<()> {
        if tools.len() != embeddings.len() {
            return Err(GatewayError::internal(
                "tool/embedding batch length mismatch",
            ));
        }
        let mut tx = self.pool.begin().await?;
        for (upsert, embedding) in tools.iter().zip(embeddings.iter()) {
            let result = match embedding {
                Some(vector) => {
                    sqlx::query(
                        "UPDATE mcp_tools SET description = ?, input_schema = ?, tags = ?,
                             tool_metadata = ?, embedding = ?
                         WHERE name = ?",
                    )
                    .bind(&upsert.description)
                    .bind(serde_json::to_string(&upsert.input_schema)?)
                    .bind(serde_json::to_string(&upsert.tags)?)
                    .bind(serde_json::to_string(&upsert.tool_metadata)?)
                    .bind(embedding_to_json(vector)?)
                    .bind(&upsert.name)
                    .execute(&mut *tx)
                    .await?
                }
                None => {
                    sqlx::query(
                        "UPDATE mcp_tools SET description = ?, input_schema = ?, tags = ?,
                             tool_metadata = ?
                         WHERE name = ?",
                    )
                    .bind(&upsert.description)
                    .bind(serde_json::to_string(&upsert.input_schema)?)
                    .bind(serde_json::to_string(&upsert.tags)?)
                    .bind(serde_json::to_string(&upsert.tool_metadata)?)
                    .bind(&upsert.name)
                    .execute(&mut *tx)
                    .await?
                }
            };
            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(GatewayError::not_found("mcp_tool", upsert.name.clone()));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_tools_by_names(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let query = format!(
            "DELETE FROM mcp_tools WHERE name IN ({})",
            in_placeholders(names.len())
        );
        let mut q = sqlx::query(&query);
        for name in names {
            q = q.bind(name);
        }
        q.execute(&self.pool).await?;
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
        if allowed_server_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT * FROM mcp_tools WHERE mcp_server_id IN ({})",
            in_placeholders(allowed_server_ids.len())
        );
        let mut q = sqlx::query(&query);
        for id in allowed_server_ids {
            q = q.bind(id.to_string());
        }
        let rows = q.fetch_all(&self.pool).await?;

        let disabled: HashSet<&Uuid> = disabled_tool_ids.iter().collect();
        let mut tools = Vec::with_capacity(rows.len());
        for row in rows {
            let tool = Self::parse_tool(&row)?;
            if !disabled.contains(&tool.id) {
                tools.push(tool);
            }
        }

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
impl AccountStorage for SqliteStorage {
    async fn create_configuration(&self, configuration: &McpServerConfiguration) -> Result<()> {
        sqlx::query(
            "INSERT INTO mcp_server_configurations
                (id, organization_id, mcp_server_id, name, auth_type,
                 connected_account_ownership, all_tools_enabled, enabled_tools, allowed_teams)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(configuration.id.to_string())
        .bind(configuration.organization_id.to_string())
        .bind(configuration.mcp_server_id.to_string())
        .bind(&configuration.name)
        .bind(auth_type_to_str(configuration.auth_type))
        .bind(ownership_to_str(configuration.connected_account_ownership))
        .bind(configuration.all_tools_enabled as i64)
        .bind(uuid_set_to_json(&configuration.enabled_tools)?)
        .bind(uuid_set_to_json(&configuration.allowed_teams)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_configuration(&self, id: Uuid) -> Result<Option<McpServerConfiguration>> {
        let row = sqlx::query("SELECT * FROM mcp_server_configurations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::parse_configuration(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_configurations_by_server(
        &self,
        server_id: Uuid,
    ) -> Result<Vec<McpServerConfiguration>> {
        let rows = sqlx::query("SELECT * FROM mcp_server_configurations WHERE mcp_server_id = ?")
            .bind(server_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut configurations = Vec::with_capacity(rows.len());
        for row in rows {
            configurations.push(Self::parse_configuration(&row)?);
        }
        Ok(configurations)
    }

    async fn get_operational_configuration(
        &self,
        server_id: Uuid,
    ) -> Result<Option<McpServerConfiguration>> {
        let row = sqlx::query(
            "SELECT * FROM mcp_server_configurations
             WHERE mcp_server_id = ? AND connected_account_ownership = 'operational'",
        )
        .bind(server_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(Self::parse_configuration(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_configuration_allowed_teams(
        &self,
        configuration_id: Uuid,
        allowed_teams: &HashSet<Uuid>,
    ) -> Result<()> {
        sqlx::query("UPDATE mcp_server_configurations SET allowed_teams = ? WHERE id = ?")
            .bind(uuid_set_to_json(allowed_teams)?)
            .bind(configuration_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_configuration(&self, id: Uuid) -> Result<()> {
        // FK cascade removes connected accounts
        sqlx::query("DELETE FROM mcp_server_configurations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_connected_account(&self, account: &ConnectedAccount) -> Result<()> {
        sqlx::query(
            "INSERT INTO connected_accounts
                (id, user_id, mcp_server_configuration_id, ownership, auth_credentials)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(account.id.to_string())
        .bind(account.user_id.map(|id| id.to_string()))
        .bind(account.mcp_server_configuration_id.to_string())
        .bind(ownership_to_str(account.ownership))
        .bind(serde_json::to_string(&account.auth_credentials)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_connected_account(
        &self,
        configuration_id: Uuid,
        ownership: ConnectedAccountOwnership,
        user_id: Option<Uuid>,
    ) -> Result<Option<ConnectedAccount>> {
        let row = match ownership {
            ConnectedAccountOwnership::Individual => {
                sqlx::query(
                    "SELECT * FROM connected_accounts
                     WHERE mcp_server_configuration_id = ? AND ownership = ? AND user_id = ?",
                )
                .bind(configuration_id.to_string())
                .bind(ownership_to_str(ownership))
                .bind(user_id.map(|id| id.to_string()))
                .fetch_optional(&self.pool)
                .await?
            }
            _ => {
                sqlx::query(
                    "SELECT * FROM connected_accounts
                     WHERE mcp_server_configuration_id = ? AND ownership = ?",
                )
                .bind(configuration_id.to_string())
                .bind(ownership_to_str(ownership))
                .fetch_optional(&self.pool)
                .await?
            }
        };
        match row {
            Some(row) => Ok(Some(Self::parse_connected_account(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_connected_accounts_by_configuration(
        &self,
        configuration_id: Uuid,
    ) -> Result<Vec<ConnectedAccount>> {
        let rows = sqlx::query(
            "SELECT * FROM connected_accounts WHERE mcp_server_configuration_id = ?",
        )
        .bind(configuration_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            accounts.push(Self::parse_connected_account(&row)?);
        }
        Ok(accounts)
    }

    async fn get_connected_accounts_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConnectedAccount>> {
        let rows = sqlx::query("SELECT * FROM connected_accounts WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            accounts.push(Self::parse_connected_account(&row)?);
        }
        Ok(accounts)
    }

    async fn update_connected_account_credentials(
        &self,
        account_id: Uuid,
        credentials: &AuthCredentials,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE connected_accounts SET auth_credentials = ? WHERE id = ?")
            .bind(serde_json::to_string(credentials)?)
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::not_found(
                "connected_account",
                account_id.to_string(),
            ));
        }
        Ok(())
    }

    async fn delete_connected_account(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM connected_accounts WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BundleStorage for SqliteStorage {
    async fn create_bundle(&self, bundle: &McpServerBundle) -> Result<()> {
        sqlx::query(
            "INSERT INTO mcp_server_bundles
                (id, user_id, organization_id, name, bundle_key, mcp_server_configuration_ids)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(bundle.id.to_string())
        .bind(bundle.user_id.to_string())
        .bind(bundle.organization_id.to_string())
        .bind(&bundle.name)
        .bind(&bundle.bundle_key)
        .bind(uuid_list_to_json(&bundle.mcp_server_configuration_ids)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_bundle(&self, id: Uuid) -> Result<Option<McpServerBundle>> {
        let row = sqlx::query("SELECT * FROM mcp_server_bundles WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::parse_bundle(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_bundles_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<McpServerBundle>> {
        let rows = sqlx::query("SELECT * FROM mcp_server_bundles WHERE organization_id = ?")
            .bind(organization_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut bundles = Vec::with_capacity(rows.len());
        for row in rows {
            bundles.push(Self::parse_bundle(&row)?);
        }
        Ok(bundles)
    }

    async fn get_bundles_containing_configuration(
        &self,
        organization_id: Uuid,
        configuration_id: Uuid,
    ) -> Result<Vec<McpServerBundle>> {
        // The configuration-id list is a JSON column; filter in-process
        let bundles = self.get_bundles_by_organization(organization_id).await?;
        Ok(bundles
            .into_iter()
            .filter(|b| b.mcp_server_configuration_ids.contains(&configuration_id))
            .collect())
    }

    async fn get_bundles_by_user(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Vec<McpServerBundle>> {
        let rows = sqlx::query(
            "SELECT * FROM mcp_server_bundles WHERE user_id = ? AND organization_id = ?",
        )
        .bind(user_id.to_string())
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let mut bundles = Vec::with_capacity(rows.len());
        for row in rows {
            bundles.push(Self::parse_bundle(&row)?);
        }
        Ok(bundles)
    }

    async fn update_bundle_configuration_ids(
        &self,
        bundle_id: Uuid,
        configuration_ids: &[Uuid],
    ) -> Result<()> {
        sqlx::query("UPDATE mcp_server_bundles SET mcp_server_configuration_ids = ? WHERE id = ?")
            .bind(uuid_list_to_json(configuration_ids)?)
            .bind(bundle_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for SqliteStorage {
    async fn create_session(&self, session: &McpSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO mcp_sessions
                (id, bundle_id, external_mcp_sessions, last_accessed_at, deleted)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.bundle_id.to_string())
        .bind(session_map_to_json(&session.external_mcp_sessions)?)
        .bind(session.last_accessed_at.timestamp())
        .bind(session.deleted as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid, include_deleted: bool) -> Result<Option<McpSession>> {
        let row = if include_deleted {
            sqlx::query("SELECT * FROM mcp_sessions WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM mcp_sessions WHERE id = ? AND deleted = 0")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?
        };
        match row {
            Some(row) => Ok(Some(Self::parse_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE mcp_sessions SET last_accessed_at = ? WHERE id = ?")
            .bind(at.timestamp())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_session_external_mcp_sessions(
        &self,
        id: Uuid,
        external_mcp_sessions: &HashMap<Uuid, String>,
    ) -> Result<()> {
        sqlx::query("UPDATE mcp_sessions SET external_mcp_sessions = ? WHERE id = ?")
            .bind(session_map_to_json(external_mcp_sessions)?)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_session_external_mcp_session(
        &self,
        id: Uuid,
        server_id: Uuid,
        upstream_session_id: &str,
    ) -> Result<()> {
        // Read-modify-write inside one immediate transaction; the write lock
        // taken up front serializes concurrent merges on the same row so two
        // upstream calls cannot clobber each other's entries
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE mcp_sessions SET deleted = deleted WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT external_mcp_sessions FROM mcp_sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(GatewayError::Storage(
                crate::error::StorageError::SessionRowVanished(id),
            ))?;

        let mut map = parse_session_map(&row.try_get::<String, _>("external_mcp_sessions")?)?;
        map.insert(server_id, upstream_session_id.to_string());

        sqlx::query("UPDATE mcp_sessions SET external_mcp_sessions = ? WHERE id = ?")
            .bind(session_map_to_json(&map)?)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE mcp_sessions SET deleted = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sweep_expired_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("UPDATE mcp_sessions SET deleted = 1 WHERE deleted = 0 AND last_accessed_at < ?")
                .bind(cutoff.timestamp())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl VirtualMcpStorage for SqliteStorage {
    async fn create_virtual_server(&self, server: &VirtualMcpServer) -> Result<()> {
        sqlx::query("INSERT INTO virtual_mcp_servers (id, name, description) VALUES (?, ?, ?)")
            .bind(server.id.to_string())
            .bind(&server.name)
            .bind(&server.description)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_virtual_server_by_name(&self, name: &str) -> Result<Option<VirtualMcpServer>> {
        let row = sqlx::query("SELECT * FROM virtual_mcp_servers WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(VirtualMcpServer {
                id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
            })),
            None => Ok(None),
        }
    }

    async fn get_virtual_tool_by_name(&self, name: &str) -> Result<Option<VirtualMcpTool>> {
        let row = sqlx::query("SELECT * FROM virtual_mcp_tools WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::parse_virtual_tool(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_virtual_tools_by_server(&self, server_id: Uuid) -> Result<Vec<VirtualMcpTool>> {
        let rows = sqlx::query(
            "SELECT * FROM virtual_mcp_tools WHERE virtual_mcp_server_id = ? ORDER BY name",
        )
        .bind(server_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let mut tools = Vec::with_capacity(rows.len());
        for row in rows {
            tools.push(Self::parse_virtual_tool(&row)?);
        }
        Ok(tools)
    }

    async fn create_virtual_tools(&self, tools: &[VirtualMcpTool]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for tool in tools {
            sqlx::query(
                "INSERT INTO virtual_mcp_tools
                    (id, virtual_mcp_server_id, name, description, input_schema, tool_metadata)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(tool.id.to_string())
            .bind(tool.virtual_mcp_server_id.to_string())
            .bind(&tool.name)
            .bind(&tool.description)
            .bind(serde_json::to_string(&tool.input_schema)?)
            .bind(serde_json::to_string(&tool.tool_metadata)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
