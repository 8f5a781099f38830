use super::storage_test::*;
use super::*;
use chrono::Utc;
use uuid::Uuid;

#[tokio::test]
async fn test_search_ordering() {
    let storage = MemoryStorage::new();
    check_tool_search_ordering(&storage).await;
}

#[tokio::test]
async fn test_session_merge() {
    let storage = MemoryStorage::new();
    check_session_merge_is_additive(&storage).await;
}

#[tokio::test]
async fn test_cascade_delete() {
    let storage = MemoryStorage::new();
    check_server_cascade_delete(&storage).await;
}

#[tokio::test]
async fn test_session_lifecycle() {
    let storage = MemoryStorage::new();
    check_session_lifecycle(&storage).await;
}

#[tokio::test]
async fn test_duplicate_server_name_rejected() {
    let storage = MemoryStorage::new();
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
async fn test_team_membership_queries() {
    let storage = MemoryStorage::new();
    let organization_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let team = Team {
        id: Uuid::new_v4(),
        organization_id,
        name: "engineering".to_string(),
    };
    storage.create_team(&team).await.unwrap();

    assert!(
        storage
            .get_teams_by_user(organization_id, user_id)
            .await
            .unwrap()
            .is_empty()
    );

    storage.add_team_member(team.id, user_id).await.unwrap();
    let teams = storage
        .get_teams_by_user(organization_id, user_id)
        .await
        .unwrap();
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].name, "engineering");

    storage.remove_team_member(team.id, user_id).await.unwrap();
    assert!(
        storage
            .get_teams_by_user(organization_id, user_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_connected_account_selection() {
    let storage = MemoryStorage::new();
    let configuration_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    storage
        .create_connected_account(&ConnectedAccount {
            id: Uuid::new_v4(),
            user_id: Some(user_id),
            mcp_server_configuration_id: configuration_id,
            ownership: ConnectedAccountOwnership::Individual,
            auth_credentials: AuthCredentials::ApiKey {
                secret_key: "k1".to_string(),
            },
        })
        .await
        .unwrap();
    storage
        .create_connected_account(&ConnectedAccount {
            id: Uuid::new_v4(),
            user_id: None,
            mcp_server_configuration_id: configuration_id,
            ownership: ConnectedAccountOwnership::Operational,
            auth_credentials: AuthCredentials::ApiKey {
                secret_key: "k2".to_string(),
            },
        })
        .await
        .unwrap();

    let individual = storage
        .get_connected_account(
            configuration_id,
            ConnectedAccountOwnership::Individual,
            Some(user_id),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(individual.user_id, Some(user_id));

    // another user has no individual account
    assert!(
        storage
            .get_connected_account(
                configuration_id,
                ConnectedAccountOwnership::Individual,
                Some(Uuid::new_v4()),
            )
            .await
            .unwrap()
            .is_none()
    );

    let operational = storage
        .get_connected_account(configuration_id, ConnectedAccountOwnership::Operational, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(operational.ownership, ConnectedAccountOwnership::Operational);
}

#[tokio::test]
async fn test_update_tools_preserves_ids() {
    let storage = MemoryStorage::new();
    let server = sample_server("KEEPID", None);
    storage.create_server(&server).await.unwrap();
    storage
        .create_tools(server.id, &[sample_tool_upsert("KEEPID__T")], &[vec![0.0; 4]])
        .await
        .unwrap();

    let before = storage.get_tool_by_name("KEEPID__T").await.unwrap().unwrap();

    let mut updated = sample_tool_upsert("KEEPID__T");
    updated.description = "changed".to_string();
    storage
        .update_tools(&[updated], &[Some(vec![1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();

    let after = storage.get_tool_by_name("KEEPID__T").await.unwrap().unwrap();
    assert_eq!(before.id, after.id);
    assert_eq!(after.description, "changed");
    assert_eq!(after.embedding, vec![1.0, 0.0, 0.0, 0.0]);

    // embedding untouched when no vector supplied
    let mut again = sample_tool_upsert("KEEPID__T");
    again.description = "changed again".to_string();
    storage.update_tools(&[again], &[None]).await.unwrap();
    let last = storage.get_tool_by_name("KEEPID__T").await.unwrap().unwrap();
    assert_eq!(last.embedding, vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(last.description, "changed again");
}

#[tokio::test]
async fn test_touch_session_updates_last_accessed() {
    let storage = MemoryStorage::new();
    let session = sample_session(Uuid::new_v4());
    storage.create_session(&session).await.unwrap();

    let later = Utc::now() + chrono::Duration::seconds(30);
    storage.touch_session(session.id, later).await.unwrap();
    let loaded = storage.get_session(session.id, false).await.unwrap().unwrap();
    assert!(loaded.last_accessed_at >= session.last_accessed_at);
}
