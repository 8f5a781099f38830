//! Access control and orphan cleanup
//!
//! A user may use a configuration iff one of their teams in the
//! configuration's organization appears in its `allowed_teams`. When team
//! membership or configuration ownership changes, derived records (connected
//! accounts, bundle entries) can become orphans; the cleaner removes them
//! and reports what it removed. Every cleaner is idempotent.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::model::*;
use crate::storage::Storage;
use crate::{GatewayError, Result};

/// Whether `user_id` may use the configuration: non-empty intersection of
/// the user's teams in the configuration's organization and the
/// configuration's allowed teams
pub async fn may_use(
    storage: &dyn Storage,
    user_id: Uuid,
    configuration: &McpServerConfiguration,
) -> Result<bool> {
    let teams = storage
        .get_teams_by_user(configuration.organization_id, user_id)
        .await?;
    Ok(teams
        .iter()
        .any(|team| configuration.allowed_teams.contains(&team.id)))
}

/// A connected account removed because its user lost access
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OrphanConnectedAccount {
    pub id: Uuid,
}

/// A configuration entry removed from a bundle
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OrphanConfigurationInBundle {
    pub bundle_id: Uuid,
    pub configuration_id: Uuid,
}

/// What one cleanup pass removed (admin log material)
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanRemovalReport {
    pub connected_accounts: Vec<OrphanConnectedAccount>,
    pub configurations_in_bundles: Vec<OrphanConfigurationInBundle>,
}

impl OrphanRemovalReport {
    pub fn is_empty(&self) -> bool {
        self.connected_accounts.is_empty() && self.configurations_in_bundles.is_empty()
    }
}

/// Removes derived records that became orphans after an ownership change.
///
/// The cleaner never re-creates anything it removed; re-running any handler
/// is a no-op.
pub struct OrphanCleaner {
    storage: Arc<dyn Storage>,
}

impl OrphanCleaner {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// A configuration's `allowed_teams` changed: drop individual accounts
    /// of users who lost access, and scrub the configuration from bundles
    /// whose owner lost access.
    pub async fn on_configuration_allowed_teams_changed(
        &self,
        configuration: &McpServerConfiguration,
    ) -> Result<OrphanRemovalReport> {
        let mut report = OrphanRemovalReport::default();

        let accounts = self
            .storage
            .get_connected_accounts_by_configuration(configuration.id)
            .await?;
        report.connected_accounts = self.clean_orphan_accounts(&accounts).await?;

        let bundles = self
            .storage
            .get_bundles_containing_configuration(configuration.organization_id, configuration.id)
            .await?;
        for bundle in &bundles {
            report
                .configurations_in_bundles
                .extend(self.clean_orphan_bundle_entries(bundle).await?);
        }
        Ok(report)
    }

    /// A configuration was deleted: its accounts go with it via cascade;
    /// every bundle in the organization that still lists it is scrubbed.
    pub async fn on_configuration_deleted(
        &self,
        organization_id: Uuid,
        configuration_id: Uuid,
    ) -> Result<OrphanRemovalReport> {
        let remaining = self
            .storage
            .get_connected_accounts_by_configuration(configuration_id)
            .await?;
        if !remaining.is_empty() {
            tracing::error!(
                configuration_id = %configuration_id,
                count = remaining.len(),
                "connected accounts survived configuration deletion; cascade misconfigured"
            );
        }

        let mut report = OrphanRemovalReport::default();
        let bundles = self
            .storage
            .get_bundles_containing_configuration(organization_id, configuration_id)
            .await?;
        for bundle in &bundles {
            self.remove_configuration_from_bundle(bundle, configuration_id)
                .await?;
            report
                .configurations_in_bundles
                .push(OrphanConfigurationInBundle {
                    bundle_id: bundle.id,
                    configuration_id,
                });
        }
        Ok(report)
    }

    /// A user was removed from a team: drop their now-inaccessible
    /// individual accounts and scrub their bundles.
    pub async fn on_user_removed_from_team(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<OrphanRemovalReport> {
        let mut report = OrphanRemovalReport::default();

        let accounts = self.storage.get_connected_accounts_by_user(user_id).await?;
        report.connected_accounts = self.clean_orphan_accounts(&accounts).await?;

        let bundles = self
            .storage
            .get_bundles_by_user(user_id, organization_id)
            .await?;
        for bundle in &bundles {
            report
                .configurations_in_bundles
                .extend(self.clean_orphan_bundle_entries(bundle).await?);
        }
        Ok(report)
    }

    /// A server was deleted: configurations, accounts and tools cascade;
    /// bundles in the organization are scrubbed of dangling configuration
    /// ids.
    pub async fn on_server_deleted(
        &self,
        organization_id: Uuid,
        server_id: Uuid,
    ) -> Result<OrphanRemovalReport> {
        let remaining = self.storage.get_configurations_by_server(server_id).await?;
        if !remaining.is_empty() {
            tracing::error!(
                server_id = %server_id,
                count = remaining.len(),
                "configurations survived server deletion; cascade misconfigured"
            );
        }

        let mut report = OrphanRemovalReport::default();
        let bundles = self
            .storage
            .get_bundles_by_organization(organization_id)
            .await?;
        for bundle in &bundles {
            report
                .configurations_in_bundles
                .extend(self.clean_orphan_bundle_entries(bundle).await?);
        }
        Ok(report)
    }

    /// Delete individual accounts whose user lost access to the account's
    /// configuration. Shared and operational accounts are never orphaned by
    /// membership changes.
    async fn clean_orphan_accounts(
        &self,
        accounts: &[ConnectedAccount],
    ) -> Result<Vec<OrphanConnectedAccount>> {
        let mut removed = Vec::new();
        for account in accounts {
            let AccountOwner::Individual { user_id } = account.owner() else {
                continue;
            };
            let Some(configuration) = self
                .storage
                .get_configuration(account.mcp_server_configuration_id)
                .await?
            else {
                // configuration is gone; the cascade owns this account
                continue;
            };
            if !may_use(self.storage.as_ref(), user_id, &configuration).await? {
                tracing::info!(account_id = %account.id, "deleting orphan connected account");
                self.storage.delete_connected_account(account.id).await?;
                removed.push(OrphanConnectedAccount { id: account.id });
            }
        }
        Ok(removed)
    }

    /// Remove bundle entries whose configuration no longer exists or is no
    /// longer accessible to the bundle owner
    async fn clean_orphan_bundle_entries(
        &self,
        bundle: &McpServerBundle,
    ) -> Result<Vec<OrphanConfigurationInBundle>> {
        let mut removed = Vec::new();
        for configuration_id in &bundle.mcp_server_configuration_ids {
            let should_remove = match self.storage.get_configuration(*configuration_id).await? {
                None => true,
                Some(configuration) => {
                    !may_use(self.storage.as_ref(), bundle.user_id, &configuration).await?
                }
            };
            if should_remove {
                tracing::info!(
                    bundle_id = %bundle.id,
                    configuration_id = %configuration_id,
                    "removing orphan configuration from bundle"
                );
                self.remove_configuration_from_bundle(bundle, *configuration_id)
                    .await?;
                removed.push(OrphanConfigurationInBundle {
                    bundle_id: bundle.id,
                    configuration_id: *configuration_id,
                });
            }
        }
        Ok(removed)
    }

    /// Drop one configuration id from a bundle's ordered list, deduplicating
    /// while preserving order
    async fn remove_configuration_from_bundle(
        &self,
        bundle: &McpServerBundle,
        configuration_id: Uuid,
    ) -> Result<()> {
        let current = self
            .storage
            .get_bundle(bundle.id)
            .await?
            .ok_or_else(|| GatewayError::not_found("mcp_server_bundle", bundle.id.to_string()))?;

        let mut seen = std::collections::HashSet::new();
        let updated: Vec<Uuid> = current
            .mcp_server_configuration_ids
            .iter()
            .filter(|id| **id != configuration_id && seen.insert(**id))
            .copied()
            .collect();

        self.storage
            .update_bundle_configuration_ids(bundle.id, &updated)
            .await
    }
}

#[cfg(test)]
mod access_test;
