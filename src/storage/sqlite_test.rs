use super::storage_test::*;
use super::*;
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

#[tokio::test]
async fn test_search_ordering() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    check_tool_search_ordering(&storage).await;
}

#[tokio::test]
async fn test_session_merge() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    check_session_merge_is_additive(&storage).await;
}

#[tokio::test]
async fn test_cascade_delete() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    check_server_cascade_delete(&storage).await;
}

#[tokio::test]
async fn test_session_lifecycle() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    check_session_lifecycle(&storage).await;
}

#[tokio::test]
async fn test_duplicate_server_name_maps_unique_violation() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    storage
        .create_server(&sample_server("DUP", None))
        .await
        .unwrap();
    let err = storage
        .create_server(&sample_server("DUP", None))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        crate::GatewayError::Storage(crate::error::StorageError::DuplicateName { .. })
    ));
}

#[tokio::test]
async fn test_server_round_trip() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    let mut server = sample_server("ROUNDTRIP", None);
    server.auth_configs = vec![
        AuthConfig::NoAuth,
        AuthConfig::ApiKey {
            location: HttpLocation::Header,
            name: "X-Api-Key".to_string(),
            prefix: None,
        },
    ];
    server.server_metadata = ServerMetadata {
        need_session: true,
        is_virtual_mcp_server: false,
    };
    storage.create_server(&server).await.unwrap();

    let loaded = storage
        .get_server_by_name("ROUNDTRIP")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.id, server.id);
    assert_eq!(loaded.auth_configs, server.auth_configs);
    assert!(loaded.server_metadata.need_session);
    assert!(loaded.last_synced_at.is_none());

    let now = Utc::now();
    storage
        .update_server_last_synced_at(server.id, now)
        .await
        .unwrap();
    let synced = storage.get_server(server.id).await.unwrap().unwrap();
    assert_eq!(synced.last_synced_at.map(|dt| dt.timestamp()), Some(now.timestamp()));
}

#[tokio::test]
async fn test_configuration_round_trip() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    let organization = Organization {
        id: Uuid::new_v4(),
        name: "acme".to_string(),
        description: None,
        created_at: Utc::now(),
    };
    storage.create_organization(&organization).await.unwrap();
    let server = sample_server("CONFTEST", Some(organization.id));
    storage.create_server(&server).await.unwrap();

    let team_id = Uuid::new_v4();
    let configuration = McpServerConfiguration {
        id: Uuid::new_v4(),
        organization_id: organization.id,
        mcp_server_id: server.id,
        name: "conf".to_string(),
        auth_type: AuthType::NoAuth,
        connected_account_ownership: ConnectedAccountOwnership::Operational,
        all_tools_enabled: false,
        enabled_tools: HashSet::from([Uuid::new_v4()]),
        allowed_teams: HashSet::from([team_id]),
    };
    storage.create_configuration(&configuration).await.unwrap();

    let loaded = storage
        .get_configuration(configuration.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.enabled_tools, configuration.enabled_tools);
    assert_eq!(loaded.allowed_teams, configuration.allowed_teams);
    assert!(!loaded.all_tools_enabled);

    let operational = storage
        .get_operational_configuration(server.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(operational.id, configuration.id);

    let new_teams = HashSet::from([Uuid::new_v4(), team_id]);
    storage
        .update_configuration_allowed_teams(configuration.id, &new_teams)
        .await
        .unwrap();
    let updated = storage
        .get_configuration(configuration.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.allowed_teams, new_teams);
}

#[tokio::test]
async fn test_credentials_update() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    let organization = Organization {
        id: Uuid::new_v4(),
        name: "credorg".to_string(),
        description: None,
        created_at: Utc::now(),
    };
    storage.create_organization(&organization).await.unwrap();
    let server = sample_server("CREDTEST", Some(organization.id));
    storage.create_server(&server).await.unwrap();
    let configuration = McpServerConfiguration {
        id: Uuid::new_v4(),
        organization_id: organization.id,
        mcp_server_id: server.id,
        name: "cred conf".to_string(),
        auth_type: AuthType::Oauth2,
        connected_account_ownership: ConnectedAccountOwnership::Shared,
        all_tools_enabled: true,
        enabled_tools: HashSet::new(),
        allowed_teams: HashSet::new(),
    };
    storage.create_configuration(&configuration).await.unwrap();

    let account = ConnectedAccount {
        id: Uuid::new_v4(),
        user_id: None,
        mcp_server_configuration_id: configuration.id,
        ownership: ConnectedAccountOwnership::Shared,
        auth_credentials: AuthCredentials::Oauth2 {
            access_token: "old".to_string(),
            token_type: Some("bearer".to_string()),
            expires_at: Some(100),
            refresh_token: Some("r".to_string()),
        },
    };
    storage.create_connected_account(&account).await.unwrap();

    let refreshed = AuthCredentials::Oauth2 {
        access_token: "new".to_string(),
        token_type: Some("bearer".to_string()),
        expires_at: Some(9999),
        refresh_token: Some("r2".to_string()),
    };
    storage
        .update_connected_account_credentials(account.id, &refreshed)
        .await
        .unwrap();
    let loaded = storage
        .get_connected_account(
            account.mcp_server_configuration_id,
            ConnectedAccountOwnership::Shared,
            None,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.auth_credentials, refreshed);
}

#[tokio::test]
async fn test_bundle_round_trip() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    let organization = Organization {
        id: Uuid::new_v4(),
        name: "bundleorg".to_string(),
        description: None,
        created_at: Utc::now(),
    };
    storage.create_organization(&organization).await.unwrap();
    let user = User {
        id: Uuid::new_v4(),
        name: "dev".to_string(),
        email: "dev@example.com".to_string(),
        email_verified: true,
        identity_provider: IdentityProvider::Password,
        password_hash: Some("hash".to_string()),
    };
    storage.create_user(&user).await.unwrap();

    let configuration_ids = vec![Uuid::new_v4(), Uuid::new_v4()];
    let bundle = McpServerBundle {
        id: Uuid::new_v4(),
        user_id: user.id,
        organization_id: organization.id,
        name: "my tools".to_string(),
        bundle_key: generate_bundle_key(),
        mcp_server_configuration_ids: configuration_ids.clone(),
    };
    storage.create_bundle(&bundle).await.unwrap();

    let loaded = storage.get_bundle(bundle.id).await.unwrap().unwrap();
    assert_eq!(loaded.mcp_server_configuration_ids, configuration_ids);

    let containing = storage
        .get_bundles_containing_configuration(organization.id, configuration_ids[0])
        .await
        .unwrap();
    assert_eq!(containing.len(), 1);

    storage
        .update_bundle_configuration_ids(bundle.id, &configuration_ids[1..])
        .await
        .unwrap();
    let trimmed = storage.get_bundle(bundle.id).await.unwrap().unwrap();
    assert_eq!(trimmed.mcp_server_configuration_ids, configuration_ids[1..]);
}

#[tokio::test]
async fn test_virtual_mcp_round_trip() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    let server = VirtualMcpServer {
        id: Uuid::new_v4(),
        name: "GMAIL".to_string(),
        description: "Gmail over REST".to_string(),
    };
    storage.create_virtual_server(&server).await.unwrap();

    let tool = VirtualMcpTool {
        id: Uuid::new_v4(),
        virtual_mcp_server_id: server.id,
        name: "GMAIL__SEND_EMAIL".to_string(),
        description: "Send an email".to_string(),
        input_schema: serde_json::json!({"type": "object"}),
        tool_metadata: VirtualMcpToolMetadata::Rest {
            method: HttpMethod::POST,
            endpoint: "https://gmail.googleapis.com/gmail/v1/users/me/messages/send".to_string(),
        },
    };
    storage.create_virtual_tools(&[tool.clone()]).await.unwrap();

    let loaded = storage
        .get_virtual_tool_by_name("GMAIL__SEND_EMAIL")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.tool_metadata, tool.tool_metadata);

    let by_server = storage
        .get_virtual_tools_by_server(server.id)
        .await
        .unwrap();
    assert_eq!(by_server.len(), 1);
}
