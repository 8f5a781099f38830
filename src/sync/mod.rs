//! Tool catalog synchronizer
//!
//! Pulls the tool list from an upstream server (through its operational
//! configuration), normalizes names, computes content hashes, diffs against
//! the stored catalog, embeds new and changed tools, and applies the result.

pub mod canonical;
pub mod diff;

use chrono::Utc;
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::credentials::{CredentialManager, resolve_auth_config};
use crate::embedding::EmbeddingClient;
use crate::model::*;
use crate::storage::Storage;
use crate::transport::UpstreamClient;
use crate::{GatewayError, Result};

pub use canonical::{normalize_and_hash_json, normalize_and_hash_text, sanitize_canonical_name};
pub use diff::{ToolDiff, diff_tools};

/// What a refresh changed, by gateway tool name (admin log material)
#[derive(Debug, Clone, Serialize)]
pub struct ToolCatalogDiffReport {
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Synchronizes one server's stored tool catalog with its upstream
pub struct ToolSynchronizer {
    storage: Arc<dyn Storage>,
    credentials: CredentialManager,
    embedding: Arc<dyn EmbeddingClient>,
    http_client: reqwest::Client,
}

impl ToolSynchronizer {
    pub fn new(
        storage: Arc<dyn Storage>,
        credentials: CredentialManager,
        embedding: Arc<dyn EmbeddingClient>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            storage,
            credentials,
            embedding,
            http_client,
        }
    }

    /// Refresh the stored catalog for a server.
    ///
    /// Requires the server to belong to an organization and to have an
    /// operational configuration (the bar to list tools).
    pub async fn refresh_tools(&self, server: &McpServer) -> Result<ToolCatalogDiffReport> {
        if server.organization_id.is_none() {
            return Err(GatewayError::validation(format!(
                "server {} has no organization; refusing to refresh a public server",
                server.name
            )));
        }

        let configuration = self
            .storage
            .get_operational_configuration(server.id)
            .await?
            .ok_or_else(|| {
                GatewayError::validation(format!(
                    "server {} has no operational configuration",
                    server.name
                ))
            })?;

        let auth_config = resolve_auth_config(server, &configuration)?;
        let credentials = self
            .credentials
            .get_credentials(server, &configuration, None)
            .await?;

        let client = UpstreamClient::connect(
            self.http_client.clone(),
            server,
            &auth_config,
            &credentials,
            None,
        )
        .await?;
        client.initialize().await?;
        let upstream_tools = client.list_tools().await?;
        tracing::info!(
            server = %server.name,
            count = upstream_tools.len(),
            "fetched upstream tools"
        );

        let existing: Vec<McpToolUpsert> = self
            .storage
            .get_tools_by_server(server.id)
            .await?
            .iter()
            .map(McpTool::as_upsert)
            .collect();
        let existing_by_name: HashMap<&str, &McpToolUpsert> =
            existing.iter().map(|tool| (tool.name.as_str(), tool)).collect();

        let mut latest = Vec::with_capacity(upstream_tools.len());
        for upstream_tool in &upstream_tools {
            let sanitized = sanitize_canonical_name(&upstream_tool.name)?;
            let tool_name = format!("{}__{}", server.name, sanitized);
            if latest
                .iter()
                .any(|existing: &McpToolUpsert| existing.name == tool_name)
            {
                // Two upstream names collapsing onto one gateway name would
                // silently drop a tool; abort the refresh instead
                return Err(GatewayError::validation(format!(
                    "tool name collision after sanitization: {}",
                    tool_name
                )));
            }

            // Tags are user-curated; carry them over so they never register
            // as upstream changes
            let tags = existing_by_name
                .get(tool_name.as_str())
                .map(|tool| tool.tags.clone())
                .unwrap_or_default();

            latest.push(McpToolUpsert {
                tool_metadata: McpToolMetadata {
                    canonical_tool_name: upstream_tool.name.clone(),
                    canonical_tool_description_hash: normalize_and_hash_text(
                        &upstream_tool.description,
                    ),
                    canonical_tool_input_schema_hash: normalize_and_hash_json(
                        &upstream_tool.input_schema,
                    ),
                },
                name: tool_name,
                description: upstream_tool.description.clone(),
                input_schema: upstream_tool.input_schema.clone(),
                tags,
            });
        }

        let diff = diff_tools(&existing, &latest);
        tracing::debug!(
            create = %diff.to_create.iter().map(|t| t.name.as_str()).join(", "),
            delete = %diff.to_delete.iter().map(|t| t.name.as_str()).join(", "),
            reembed = diff.to_update_with_reembedding.len(),
            update = diff.to_update_without_reembedding.len(),
            unchanged = diff.unchanged.len(),
            "tool catalog diff computed"
        );

        // Embed what is new or semantically changed
        let create_embeddings = self.embed_tools(&diff.to_create).await?;
        let reembed_embeddings = self.embed_tools(&diff.to_update_with_reembedding).await?;

        self.storage
            .create_tools(server.id, &diff.to_create, &create_embeddings)
            .await?;

        let mut updates = diff.to_update_with_reembedding.clone();
        updates.extend(diff.to_update_without_reembedding.iter().cloned());
        let mut update_embeddings: Vec<Option<Vec<f32>>> =
            reembed_embeddings.into_iter().map(Some).collect();
        update_embeddings
            .extend(std::iter::repeat_n(None, diff.to_update_without_reembedding.len()));
        self.storage.update_tools(&updates, &update_embeddings).await?;

        let deleted_names: Vec<String> =
            diff.to_delete.iter().map(|tool| tool.name.clone()).collect();
        self.storage.delete_tools_by_names(&deleted_names).await?;

        self.storage
            .update_server_last_synced_at(server.id, Utc::now())
            .await?;

        Ok(ToolCatalogDiffReport {
            created: diff.to_create.iter().map(|t| t.name.clone()).collect(),
            deleted: deleted_names,
            updated: updates.iter().map(|t| t.name.clone()).collect(),
            unchanged: diff.unchanged.iter().map(|t| t.name.clone()).collect(),
        })
    }

    async fn embed_tools(&self, tools: &[McpToolUpsert]) -> Result<Vec<Vec<f32>>> {
        if tools.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = tools.iter().map(McpToolUpsert::embedding_text).collect();
        self.embedding.embed_batch(&texts).await
    }
}

#[cfg(test)]
mod canonical_test;
