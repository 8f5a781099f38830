//! Utility functions and helpers
//!
//! Common utilities used throughout the gateway.

use std::sync::Arc;
use tempfile::TempDir;

use crate::config::{Config, StorageConfig};
use crate::http::AppState;
use crate::storage::Storage;

/// Test environment with an isolated temporary database (test builds only)
///
/// Provides a complete, production-shaped application state backed by a
/// SQLite database in a temp directory (auto-cleaned on drop). Without an
/// embedding key the state falls back to deterministic hash embeddings, so
/// tests never need network access for search.
///
/// # Example
///
/// ```no_run
/// use aci_gateway::utils::TestEnvironment;
///
/// # async fn example() {
/// let env = TestEnvironment::new().await;
/// let app = aci_gateway::http::build_router(env.state.clone()).unwrap();
/// # }
/// ```
pub struct TestEnvironment {
    /// Temporary directory - kept alive for the test duration
    _temp_dir: TempDir,

    /// Application state wired exactly like production
    pub state: AppState,

    /// Configuration the state was built from
    pub config: Config,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub async fn new() -> Self {
        Self::with_db_name("gateway.db").await
    }

    /// Create a test environment with a custom database name
    ///
    /// Useful when a test needs multiple isolated environments
    pub async fn with_db_name(db_name: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join(db_name);

        let config = Config {
            storage: StorageConfig {
                driver: crate::constants::STORAGE_DRIVER_SQLITE.to_string(),
                dsn: db_path.to_str().expect("utf-8 temp path").to_string(),
            },
            ..Config::default()
        };

        let state = AppState::from_config(&config)
            .await
            .expect("Failed to build application state");

        TestEnvironment {
            _temp_dir: temp_dir,
            state,
            config,
        }
    }

    /// The storage behind the state
    pub fn storage(&self) -> Arc<dyn Storage> {
        self.state.storage.clone()
    }
}
