//! Gateway CLI
//!
//! `gateway serve` runs the HTTP server; the admin subcommands drive the
//! background paths (tool sync, session sweeping) and seed demo data for
//! local bring-up.

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use crate::config::Config;
use crate::http::{AppState, build_http_client};
use crate::model::*;
use crate::sync::ToolSynchronizer;
use crate::{GatewayError, Result};

#[derive(Parser)]
#[command(name = "gateway", version, about = "ACI.dev MCP Gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve,

    /// Refresh the tool catalog of one server from its upstream
    SyncTools {
        /// Server name (ALLCAPS)
        #[arg(long)]
        server: String,
    },

    /// Soft-delete sessions idle past the TTL
    SweepSessions,

    /// Insert demo data for local development
    Seed,
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve => crate::http::start_server(config).await,

        Command::SyncTools { server } => {
            let state = AppState::from_config(&config).await?;
            let server = state
                .storage
                .get_server_by_name(&server)
                .await?
                .ok_or_else(|| GatewayError::not_found("mcp_server", server))?;

            let http_client = build_http_client()?;
            let synchronizer = ToolSynchronizer::new(
                state.storage.clone(),
                crate::credentials::CredentialManager::new(
                    state.storage.clone(),
                    http_client.clone(),
                ),
                crate::embedding::create_embedding_client(&config.embedding, http_client.clone()),
                http_client,
            );
            let report = synchronizer.refresh_tools(&server).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        Command::SweepSessions => {
            let state = AppState::from_config(&config).await?;
            let swept = state.sessions.sweep_expired_sessions().await?;
            println!("swept {} expired sessions", swept);
            Ok(())
        }

        Command::Seed => {
            let state = AppState::from_config(&config).await?;
            seed_demo_data(&state, &config).await
        }
    }
}

/// Seed a demo organization with a virtual GMAIL server and a bundle
async fn seed_demo_data(state: &AppState, config: &Config) -> Result<()> {
    let embedding = crate::embedding::create_embedding_client(
        &config.embedding,
        build_http_client()?,
    );
    let organization = Organization {
        id: Uuid::new_v4(),
        name: "Demo Org".to_string(),
        description: Some("Seeded demo organization".to_string()),
        created_at: Utc::now(),
    };
    state.storage.create_organization(&organization).await?;

    let user = User {
        id: Uuid::new_v4(),
        name: "Demo User".to_string(),
        email: "demo@example.com".to_string(),
        email_verified: true,
        identity_provider: IdentityProvider::Password,
        password_hash: None,
    };
    state.storage.create_user(&user).await?;

    let team = Team {
        id: Uuid::new_v4(),
        organization_id: organization.id,
        name: "everyone".to_string(),
    };
    state.storage.create_team(&team).await?;
    state.storage.add_team_member(team.id, user.id).await?;

    // Virtual GMAIL server, registered both in the catalog and as a virtual
    // server so EXECUTE_TOOL can route to the in-process connector
    let mut server = McpServer {
        id: Uuid::new_v4(),
        name: "GMAIL".to_string(),
        url: "http://localhost:8000/virtual/mcp?server_name=GMAIL".to_string(),
        transport: TransportType::StreamableHttp,
        description: "Send and draft email with Gmail".to_string(),
        categories: vec!["email".to_string(), "productivity".to_string()],
        auth_configs: vec![AuthConfig::NoAuth],
        server_metadata: ServerMetadata {
            need_session: false,
            is_virtual_mcp_server: true,
        },
        organization_id: Some(organization.id),
        last_synced_at: None,
        embedding: vec![],
    };
    server.embedding = embedding.embed(&server.embedding_text()).await?;
    state.storage.create_server(&server).await?;

    let send_email_schema = json!({
        "type": "object",
        "properties": {
            "sender": {"type": "string", "description": "Sender email address"},
            "recipient": {"type": "string", "description": "Recipient email address"},
            "body": {"type": "string", "description": "Email body content"},
            "subject": {"type": "string", "description": "Optional email subject"},
        },
        "required": ["sender", "recipient", "body"],
        "additionalProperties": false,
    });
    let send_email_tool = McpToolUpsert {
        name: "GMAIL__SEND_EMAIL".to_string(),
        description: "Send an email using Gmail".to_string(),
        input_schema: send_email_schema.clone(),
        tags: vec![],
        tool_metadata: McpToolMetadata {
            canonical_tool_name: "SEND_EMAIL".to_string(),
            canonical_tool_description_hash: crate::sync::normalize_and_hash_text(
                "Send an email using Gmail",
            ),
            canonical_tool_input_schema_hash: crate::sync::normalize_and_hash_json(
                &send_email_schema,
            ),
        },
    };
    let tool_embedding = embedding.embed(&send_email_tool.embedding_text()).await?;
    state
        .storage
        .create_tools(server.id, &[send_email_tool], &[tool_embedding])
        .await?;

    let virtual_server = VirtualMcpServer {
        id: Uuid::new_v4(),
        name: "GMAIL".to_string(),
        description: "Gmail connector".to_string(),
    };
    state.storage.create_virtual_server(&virtual_server).await?;
    state
        .storage
        .create_virtual_tools(&[VirtualMcpTool {
            id: Uuid::new_v4(),
            virtual_mcp_server_id: virtual_server.id,
            name: "GMAIL__SEND_EMAIL".to_string(),
            description: "Send an email using Gmail".to_string(),
            input_schema: send_email_schema,
            tool_metadata: VirtualMcpToolMetadata::Connector,
        }])
        .await?;

    let configuration = McpServerConfiguration {
        id: Uuid::new_v4(),
        organization_id: organization.id,
        mcp_server_id: server.id,
        name: "Gmail for everyone".to_string(),
        auth_type: AuthType::NoAuth,
        connected_account_ownership: ConnectedAccountOwnership::Shared,
        all_tools_enabled: true,
        enabled_tools: HashSet::new(),
        allowed_teams: HashSet::from([team.id]),
    };
    state.storage.create_configuration(&configuration).await?;
    state
        .storage
        .create_connected_account(&ConnectedAccount {
            id: Uuid::new_v4(),
            user_id: None,
            mcp_server_configuration_id: configuration.id,
            ownership: ConnectedAccountOwnership::Shared,
            auth_credentials: AuthCredentials::NoAuth,
        })
        .await?;

    let bundle = McpServerBundle {
        id: Uuid::new_v4(),
        user_id: user.id,
        organization_id: organization.id,
        name: "Demo bundle".to_string(),
        bundle_key: generate_bundle_key(),
        mcp_server_configuration_ids: vec![configuration.id],
    };
    state.storage.create_bundle(&bundle).await?;

    println!("seeded demo data");
    println!("  bundle_id: {}", bundle.id);
    println!("  connect:   POST /mcp?bundle_id={}", bundle.id);
    Ok(())
}
