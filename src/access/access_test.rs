use super::*;
use crate::storage::{AccountStorage, BundleStorage, IdentityStorage, MemoryStorage, Storage};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

struct AccessFixture {
    storage: Arc<MemoryStorage>,
    cleaner: OrphanCleaner,
    organization_id: Uuid,
    user_id: Uuid,
    team_id: Uuid,
    configuration: McpServerConfiguration,
}

async fn fixture() -> AccessFixture {
    let storage = Arc::new(MemoryStorage::new());
    let organization_id = Uuid::new_v4();
    storage
        .create_organization(&Organization {
            id: organization_id,
            name: "acme".to_string(),
            description: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let user_id = Uuid::new_v4();
    storage
        .create_user(&User {
            id: user_id,
            name: "dev".to_string(),
            email: "dev@acme.test".to_string(),
            email_verified: true,
            identity_provider: IdentityProvider::Password,
            password_hash: None,
        })
        .await
        .unwrap();

    let team_id = Uuid::new_v4();
    storage
        .create_team(&Team {
            id: team_id,
            organization_id,
            name: "engineering".to_string(),
        })
        .await
        .unwrap();
    storage.add_team_member(team_id, user_id).await.unwrap();

    let server_id = Uuid::new_v4();
    let configuration = McpServerConfiguration {
        id: Uuid::new_v4(),
        organization_id,
        mcp_server_id: server_id,
        name: "conf".to_string(),
        auth_type: AuthType::NoAuth,
        connected_account_ownership: ConnectedAccountOwnership::Individual,
        all_tools_enabled: true,
        enabled_tools: HashSet::new(),
        allowed_teams: HashSet::from([team_id]),
    };
    storage.create_configuration(&configuration).await.unwrap();

    let cleaner = OrphanCleaner::new(storage.clone() as Arc<dyn Storage>);
    AccessFixture {
        storage,
        cleaner,
        organization_id,
        user_id,
        team_id,
        configuration,
    }
}

async fn seed_account(fx: &AccessFixture) -> ConnectedAccount {
    let account = ConnectedAccount {
        id: Uuid::new_v4(),
        user_id: Some(fx.user_id),
        mcp_server_configuration_id: fx.configuration.id,
        ownership: ConnectedAccountOwnership::Individual,
        auth_credentials: AuthCredentials::NoAuth,
    };
    fx.storage.create_connected_account(&account).await.unwrap();
    account
}

async fn seed_bundle(fx: &AccessFixture, configuration_ids: Vec<Uuid>) -> McpServerBundle {
    let bundle = McpServerBundle {
        id: Uuid::new_v4(),
        user_id: fx.user_id,
        organization_id: fx.organization_id,
        name: "bundle".to_string(),
        bundle_key: generate_bundle_key(),
        mcp_server_configuration_ids: configuration_ids,
    };
    fx.storage.create_bundle(&bundle).await.unwrap();
    bundle
}

#[tokio::test]
async fn test_may_use_is_team_intersection() {
    let fx = fixture().await;
    assert!(
        may_use(fx.storage.as_ref(), fx.user_id, &fx.configuration)
            .await
            .unwrap()
    );

    // a user with no teams has no access
    let stranger = Uuid::new_v4();
    assert!(
        !may_use(fx.storage.as_ref(), stranger, &fx.configuration)
            .await
            .unwrap()
    );

    // empty allowed_teams denies everyone
    let mut closed = fx.configuration.clone();
    closed.allowed_teams = HashSet::new();
    assert!(
        !may_use(fx.storage.as_ref(), fx.user_id, &closed)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_allowed_teams_change_removes_account_and_bundle_entry() {
    let fx = fixture().await;
    let account = seed_account(&fx).await;
    let bundle = seed_bundle(&fx, vec![fx.configuration.id]).await;

    // revoke the team
    let revoked = HashSet::from([Uuid::new_v4()]);
    fx.storage
        .update_configuration_allowed_teams(fx.configuration.id, &revoked)
        .await
        .unwrap();
    let updated = fx
        .storage
        .get_configuration(fx.configuration.id)
        .await
        .unwrap()
        .unwrap();

    let report = fx
        .cleaner
        .on_configuration_allowed_teams_changed(&updated)
        .await
        .unwrap();

    assert_eq!(
        report.connected_accounts,
        vec![OrphanConnectedAccount { id: account.id }]
    );
    assert_eq!(
        report.configurations_in_bundles,
        vec![OrphanConfigurationInBundle {
            bundle_id: bundle.id,
            configuration_id: fx.configuration.id,
        }]
    );

    let remaining = fx.storage.get_bundle(bundle.id).await.unwrap().unwrap();
    assert!(remaining.mcp_server_configuration_ids.is_empty());
    assert!(
        fx.storage
            .get_connected_accounts_by_configuration(fx.configuration.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_shared_accounts_survive_membership_changes() {
    let fx = fixture().await;
    let shared = ConnectedAccount {
        id: Uuid::new_v4(),
        user_id: None,
        mcp_server_configuration_id: fx.configuration.id,
        ownership: ConnectedAccountOwnership::Shared,
        auth_credentials: AuthCredentials::NoAuth,
    };
    fx.storage.create_connected_account(&shared).await.unwrap();

    let revoked = HashSet::new();
    fx.storage
        .update_configuration_allowed_teams(fx.configuration.id, &revoked)
        .await
        .unwrap();
    let updated = fx
        .storage
        .get_configuration(fx.configuration.id)
        .await
        .unwrap()
        .unwrap();

    let report = fx
        .cleaner
        .on_configuration_allowed_teams_changed(&updated)
        .await
        .unwrap();
    assert!(report.connected_accounts.is_empty());
    assert_eq!(
        fx.storage
            .get_connected_accounts_by_configuration(fx.configuration.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_cleaners_are_idempotent() {
    let fx = fixture().await;
    seed_account(&fx).await;
    let bundle = seed_bundle(&fx, vec![fx.configuration.id]).await;

    fx.storage
        .update_configuration_allowed_teams(fx.configuration.id, &HashSet::new())
        .await
        .unwrap();
    let updated = fx
        .storage
        .get_configuration(fx.configuration.id)
        .await
        .unwrap()
        .unwrap();

    let first = fx
        .cleaner
        .on_configuration_allowed_teams_changed(&updated)
        .await
        .unwrap();
    assert!(!first.is_empty());

    // running again removes nothing further and changes nothing
    let second = fx
        .cleaner
        .on_configuration_allowed_teams_changed(&updated)
        .await
        .unwrap();
    assert!(second.is_empty());
    let remaining = fx.storage.get_bundle(bundle.id).await.unwrap().unwrap();
    assert!(remaining.mcp_server_configuration_ids.is_empty());
}

#[tokio::test]
async fn test_on_configuration_deleted_scrubs_bundles() {
    let fx = fixture().await;
    let other_configuration_id = Uuid::new_v4();
    let keep = McpServerConfiguration {
        id: other_configuration_id,
        ..fx.configuration.clone()
    };
    fx.storage.create_configuration(&keep).await.unwrap();
    let bundle = seed_bundle(&fx, vec![fx.configuration.id, other_configuration_id]).await;

    fx.storage
        .delete_configuration(fx.configuration.id)
        .await
        .unwrap();
    let report = fx
        .cleaner
        .on_configuration_deleted(fx.organization_id, fx.configuration.id)
        .await
        .unwrap();

    assert_eq!(report.configurations_in_bundles.len(), 1);
    let remaining = fx.storage.get_bundle(bundle.id).await.unwrap().unwrap();
    assert_eq!(
        remaining.mcp_server_configuration_ids,
        vec![other_configuration_id]
    );
}

#[tokio::test]
async fn test_on_user_removed_from_team() {
    let fx = fixture().await;
    let account = seed_account(&fx).await;
    let bundle = seed_bundle(&fx, vec![fx.configuration.id]).await;

    fx.storage
        .remove_team_member(fx.team_id, fx.user_id)
        .await
        .unwrap();
    let report = fx
        .cleaner
        .on_user_removed_from_team(fx.user_id, fx.organization_id)
        .await
        .unwrap();

    assert_eq!(
        report.connected_accounts,
        vec![OrphanConnectedAccount { id: account.id }]
    );
    let remaining = fx.storage.get_bundle(bundle.id).await.unwrap().unwrap();
    assert!(remaining.mcp_server_configuration_ids.is_empty());
}

#[tokio::test]
async fn test_on_server_deleted_scrubs_dangling_ids() {
    let fx = fixture().await;
    let bundle = seed_bundle(&fx, vec![fx.configuration.id]).await;

    // simulate the cascade: configuration rows disappear with the server
    fx.storage
        .delete_configuration(fx.configuration.id)
        .await
        .unwrap();

    let report = fx
        .cleaner
        .on_server_deleted(fx.organization_id, fx.configuration.mcp_server_id)
        .await
        .unwrap();
    assert_eq!(report.configurations_in_bundles.len(), 1);
    let remaining = fx.storage.get_bundle(bundle.id).await.unwrap().unwrap();
    assert!(remaining.mcp_server_configuration_ids.is_empty());
}

#[tokio::test]
async fn test_bundle_order_preserved_and_deduplicated() {
    let fx = fixture().await;
    let keep_a = Uuid::new_v4();
    let keep_b = Uuid::new_v4();
    for id in [keep_a, keep_b] {
        fx.storage
            .create_configuration(&McpServerConfiguration {
                id,
                ..fx.configuration.clone()
            })
            .await
            .unwrap();
    }
    // duplicated entry plus a doomed one in the middle
    let bundle = seed_bundle(
        &fx,
        vec![keep_a, fx.configuration.id, keep_b, keep_a],
    )
    .await;

    fx.storage
        .delete_configuration(fx.configuration.id)
        .await
        .unwrap();
    fx.cleaner
        .on_configuration_deleted(fx.organization_id, fx.configuration.id)
        .await
        .unwrap();

    let remaining = fx.storage.get_bundle(bundle.id).await.unwrap().unwrap();
    assert_eq!(remaining.mcp_server_configuration_ids, vec![keep_a, keep_b]);
}
