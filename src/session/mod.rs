//! Gateway session manager
//!
//! One gateway MCP session multiplexes a client over every upstream in its
//! bundle. On `initialize` the manager fans out to each configured upstream,
//! collects the upstream session ids and persists them; during `tools/call`
//! newly issued upstream ids are merged in under the storage row lock.
//! Sessions expire lazily after an idle TTL and are soft-deleted.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::credentials::{CredentialManager, resolve_auth_config};
use crate::model::*;
use crate::storage::Storage;
use crate::transport::UpstreamClient;
use crate::Result;

/// Manages gateway MCP session lifecycle
#[derive(Clone)]
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    credentials: CredentialManager,
    http_client: reqwest::Client,
    idle_ttl_secs: i64,
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        credentials: CredentialManager,
        http_client: reqwest::Client,
        idle_ttl_secs: i64,
    ) -> Self {
        Self {
            storage,
            credentials,
            http_client,
            idle_ttl_secs,
        }
    }

    /// Look up a live session. Expired sessions are soft-deleted on sight
    /// and reported as absent, so the client's next `initialize` starts
    /// fresh. Live sessions get their `last_accessed_at` bumped.
    pub async fn resolve_session(&self, session_id: Uuid) -> Result<Option<McpSession>> {
        let Some(session) = self.storage.get_session(session_id, false).await? else {
            return Ok(None);
        };

        let expired_at = session.last_accessed_at + Duration::seconds(self.idle_ttl_secs);
        if Utc::now() > expired_at {
            tracing::info!(session_id = %session_id, "session expired, soft-deleting");
            self.storage.delete_session(session_id).await?;
            return Ok(None);
        }

        self.storage.touch_session(session_id, Utc::now()).await?;
        Ok(Some(session))
    }

    /// Create a session for a bundle: fan out `initialize` to every upstream
    /// in the bundle and persist the upstream session ids that came back.
    ///
    /// Per-upstream failures are logged and skipped; one bad upstream must
    /// not block the whole bundle.
    pub async fn initialize_session(&self, bundle: &McpServerBundle) -> Result<McpSession> {
        let mut session = McpSession {
            id: Uuid::new_v4(),
            bundle_id: bundle.id,
            external_mcp_sessions: HashMap::new(),
            last_accessed_at: Utc::now(),
            deleted: false,
        };
        self.storage.create_session(&session).await?;

        let mut external_mcp_sessions = HashMap::new();
        for configuration_id in &bundle.mcp_server_configuration_ids {
            let Some(configuration) = self.storage.get_configuration(*configuration_id).await?
            else {
                // stale bundle entry awaiting orphan cleanup
                tracing::error!(
                    configuration_id = %configuration_id,
                    bundle_id = %bundle.id,
                    "configuration listed in bundle not found"
                );
                continue;
            };
            match self.initialize_upstream(bundle, &configuration).await {
                Ok(Some(upstream_session_id)) => {
                    external_mcp_sessions.insert(configuration.mcp_server_id, upstream_session_id);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        configuration_id = %configuration.id,
                        bundle_id = %bundle.id,
                        error = %e,
                        "failed to initialize upstream session"
                    );
                }
            }
        }

        self.storage
            .set_session_external_mcp_sessions(session.id, &external_mcp_sessions)
            .await?;
        session.external_mcp_sessions = external_mcp_sessions;
        Ok(session)
    }

    /// Initialize one upstream and return its session id, if it issued one.
    /// Virtual servers and SSE upstreams are session-less.
    async fn initialize_upstream(
        &self,
        bundle: &McpServerBundle,
        configuration: &McpServerConfiguration,
    ) -> Result<Option<String>> {
        let Some(server) = self.storage.get_server(configuration.mcp_server_id).await? else {
            tracing::error!(
                server_id = %configuration.mcp_server_id,
                "server for configuration not found"
            );
            return Ok(None);
        };
        if server.server_metadata.is_virtual_mcp_server
            || server.transport == TransportType::Sse
        {
            return Ok(None);
        }

        let auth_config = resolve_auth_config(&server, configuration)?;
        let credentials = self
            .credentials
            .get_credentials(&server, configuration, Some(bundle.user_id))
            .await?;

        let client = UpstreamClient::connect(
            self.http_client.clone(),
            &server,
            &auth_config,
            &credentials,
            None,
        )
        .await?;
        let session_id = client.initialize().await?;
        tracing::debug!(
            server = %server.name,
            bundle_id = %bundle.id,
            has_session = session_id.is_some(),
            "initialized upstream session"
        );
        Ok(session_id)
    }

    /// Merge a newly issued upstream session id into the session row.
    /// Runs under the storage row lock so concurrent merges for different
    /// servers cannot clobber each other.
    pub async fn record_upstream_session(
        &self,
        session_id: Uuid,
        server_id: Uuid,
        upstream_session_id: &str,
    ) -> Result<()> {
        self.storage
            .update_session_external_mcp_session(session_id, server_id, upstream_session_id)
            .await
    }

    /// Soft-delete one session (client-initiated teardown)
    pub async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        self.storage.delete_session(session_id).await
    }

    /// Soft-delete every session idle past the TTL; returns the count
    pub async fn sweep_expired_sessions(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::seconds(self.idle_ttl_secs);
        self.storage.sweep_expired_sessions(cutoff).await
    }
}
