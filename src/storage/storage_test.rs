//! Behavioral tests shared by all storage backends

use super::*;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub(crate) fn sample_server(name: &str, organization_id: Option<Uuid>) -> McpServer {
    McpServer {
        id: Uuid::new_v4(),
        name: name.to_string(),
        url: "https://mcp.example.com/mcp".to_string(),
        transport: TransportType::StreamableHttp,
        description: format!("{} upstream", name),
        categories: vec!["productivity".to_string()],
        auth_configs: vec![AuthConfig::NoAuth],
        server_metadata: ServerMetadata::default(),
        organization_id,
        last_synced_at: None,
        embedding: vec![0.0; 4],
    }
}

pub(crate) fn sample_tool_upsert(name: &str) -> McpToolUpsert {
    McpToolUpsert {
        name: name.to_string(),
        description: format!("tool {}", name),
        input_schema: serde_json::json!({"type": "object", "properties": {}}),
        tags: vec![],
        tool_metadata: McpToolMetadata {
            canonical_tool_name: name.to_lowercase(),
            canonical_tool_description_hash: "d".repeat(64),
            canonical_tool_input_schema_hash: "s".repeat(64),
        },
    }
}

pub(crate) fn sample_session(bundle_id: Uuid) -> McpSession {
    McpSession {
        id: Uuid::new_v4(),
        bundle_id,
        external_mcp_sessions: HashMap::new(),
        last_accessed_at: Utc::now(),
        deleted: false,
    }
}

pub(crate) async fn check_tool_search_ordering(storage: &dyn Storage) {
    let server = sample_server("ORDERTEST", None);
    storage.create_server(&server).await.unwrap();

    let upserts = vec![
        sample_tool_upsert("ORDERTEST__BETA"),
        sample_tool_upsert("ORDERTEST__ALPHA"),
        sample_tool_upsert("ORDERTEST__GAMMA"),
    ];
    let embeddings = vec![
        vec![1.0, 0.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
        vec![0.9, 0.1, 0.0, 0.0],
    ];
    storage
        .create_tools(server.id, &upserts, &embeddings)
        .await
        .unwrap();

    // no vector: stable name order
    let by_name = storage
        .search_tools(&[server.id], &[], None, 10, 0)
        .await
        .unwrap();
    let names: Vec<&str> = by_name.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["ORDERTEST__ALPHA", "ORDERTEST__BETA", "ORDERTEST__GAMMA"]
    );

    // with vector: cosine distance ascending
    let by_distance = storage
        .search_tools(&[server.id], &[], Some(&[1.0, 0.0, 0.0, 0.0]), 10, 0)
        .await
        .unwrap();
    assert_eq!(by_distance[0].name, "ORDERTEST__BETA");
    assert_eq!(by_distance[1].name, "ORDERTEST__GAMMA");
    assert_eq!(by_distance[2].name, "ORDERTEST__ALPHA");

    // disabled tools are excluded
    let beta_id = by_distance[0].id;
    let filtered = storage
        .search_tools(&[server.id], &[beta_id], None, 10, 0)
        .await
        .unwrap();
    assert!(filtered.iter().all(|t| t.id != beta_id));

    // offset pagination
    let page = storage
        .search_tools(&[server.id], &[], None, 1, 1)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].name, "ORDERTEST__BETA");
}

pub(crate) async fn check_session_merge_is_additive(storage: &dyn Storage) {
    let bundle_id = Uuid::new_v4();
    let session = sample_session(bundle_id);
    storage.create_session(&session).await.unwrap();

    let server_a = Uuid::new_v4();
    let server_b = Uuid::new_v4();

    // Concurrent merges for distinct servers must both land
    let (ra, rb) = tokio::join!(
        storage.update_session_external_mcp_session(session.id, server_a, "sess-a"),
        storage.update_session_external_mcp_session(session.id, server_b, "sess-b"),
    );
    ra.unwrap();
    rb.unwrap();

    let loaded = storage.get_session(session.id, false).await.unwrap().unwrap();
    assert_eq!(
        loaded.external_mcp_sessions.get(&server_a).map(String::as_str),
        Some("sess-a")
    );
    assert_eq!(
        loaded.external_mcp_sessions.get(&server_b).map(String::as_str),
        Some("sess-b")
    );
}

pub(crate) async fn check_server_cascade_delete(storage: &dyn Storage) {
    let organization = Organization {
        id: Uuid::new_v4(),
        name: format!("org-{}", Uuid::new_v4()),
        description: None,
        created_at: Utc::now(),
    };
    storage.create_organization(&organization).await.unwrap();

    let server = sample_server("CASCADE", Some(organization.id));
    storage.create_server(&server).await.unwrap();
    storage
        .create_tools(
            server.id,
            &[sample_tool_upsert("CASCADE__PING")],
            &[vec![0.0; 4]],
        )
        .await
        .unwrap();

    let configuration = McpServerConfiguration {
        id: Uuid::new_v4(),
        organization_id: organization.id,
        mcp_server_id: server.id,
        name: "cascade config".to_string(),
        auth_type: AuthType::NoAuth,
        connected_account_ownership: ConnectedAccountOwnership::Shared,
        all_tools_enabled: true,
        enabled_tools: HashSet::new(),
        allowed_teams: HashSet::new(),
    };
    storage.create_configuration(&configuration).await.unwrap();
    storage
        .create_connected_account(&ConnectedAccount {
            id: Uuid::new_v4(),
            user_id: None,
            mcp_server_configuration_id: configuration.id,
            ownership: ConnectedAccountOwnership::Shared,
            auth_credentials: AuthCredentials::NoAuth,
        })
        .await
        .unwrap();

    storage.delete_server(server.id).await.unwrap();

    assert!(storage.get_server(server.id).await.unwrap().is_none());
    assert!(
        storage
            .get_tool_by_name("CASCADE__PING")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        storage
            .get_configuration(configuration.id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        storage
            .get_connected_accounts_by_configuration(configuration.id)
            .await
            .unwrap()
            .is_empty()
    );
}

pub(crate) async fn check_session_lifecycle(storage: &dyn Storage) {
    let session = sample_session(Uuid::new_v4());
    storage.create_session(&session).await.unwrap();

    storage.delete_session(session.id).await.unwrap();
    assert!(storage.get_session(session.id, false).await.unwrap().is_none());
    assert!(storage.get_session(session.id, true).await.unwrap().is_some());

    // sweep: everything older than the cutoff is soft-deleted
    let stale = sample_session(Uuid::new_v4());
    storage.create_session(&stale).await.unwrap();
    let swept = storage
        .sweep_expired_sessions(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert!(swept >= 1);
    assert!(storage.get_session(stale.id, false).await.unwrap().is_none());
}

#[test]
fn test_cosine_distance() {
    assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
    assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
    assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    // mismatched and zero vectors sort last
    assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), f32::MAX);
    assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), f32::MAX);
}
