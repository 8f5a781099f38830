//! Configuration management for the gateway
//!
//! All configuration comes from the environment (see §constants for the
//! variable names); `Config::from_env` is the single entry point.

use serde::{Deserialize, Serialize};
use std::env;

use crate::constants::*;
use crate::{GatewayError, Result};

/// Complete gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration (required)
    pub storage: StorageConfig,

    /// HTTP server configuration
    pub http: HttpConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// HS256 key for the optional bearer check on the MCP endpoint.
    /// None disables the check (local development).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_signing_key: Option<String>,

    /// Base URL of the control-plane frontend, used to construct OAuth
    /// redirect URIs for account linking
    pub frontend_base_url: String,

    /// Idle TTL for gateway MCP sessions, in seconds
    pub session_idle_ttl_secs: i64,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Driver name (sqlite, memory)
    pub driver: String,

    /// Data source name / connection string
    pub dsn: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// API key for the provider; empty disables outbound embedding calls
    pub api_key: String,

    /// OpenAI-compatible base URL (`{base_url}/embeddings`)
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                driver: STORAGE_DRIVER_MEMORY.to_string(),
                dsn: String::new(),
            },
            http: HttpConfig {
                host: "127.0.0.1".to_string(),
                port: DEFAULT_HTTP_PORT,
            },
            embedding: EmbeddingConfig {
                api_key: String::new(),
                base_url: DEFAULT_EMBEDDING_BASE_URL.to_string(),
            },
            jwt_signing_key: None,
            frontend_base_url: "http://localhost:3000".to_string(),
            session_idle_ttl_secs: SESSION_IDLE_TTL_SECS,
        }
    }
}

impl Config {
    /// Load configuration from the environment
    pub fn from_env() -> Result<Self> {
        let database_url = env::var(ENV_DATABASE_URL).unwrap_or_default();
        let storage = if database_url.is_empty() {
            StorageConfig {
                driver: STORAGE_DRIVER_MEMORY.to_string(),
                dsn: String::new(),
            }
        } else if database_url.starts_with("sqlite:") || database_url.ends_with(".db") {
            StorageConfig {
                driver: STORAGE_DRIVER_SQLITE.to_string(),
                dsn: database_url,
            }
        } else {
            return Err(GatewayError::config(format!(
                "Unsupported DATABASE_URL: {}. Supported: sqlite paths, empty (memory)",
                database_url
            )));
        };

        let port = match env::var(ENV_GATEWAY_PORT) {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| GatewayError::config(format!("Invalid {}: {}", ENV_GATEWAY_PORT, e)))?,
            Err(_) => DEFAULT_HTTP_PORT,
        };

        let config = Self {
            storage,
            http: HttpConfig {
                host: env::var(ENV_GATEWAY_HOST).unwrap_or_else(|_| "127.0.0.1".to_string()),
                port,
            },
            embedding: EmbeddingConfig {
                api_key: env::var(ENV_EMBEDDING_API_KEY).unwrap_or_default(),
                base_url: env::var(ENV_EMBEDDING_BASE_URL)
                    .unwrap_or_else(|_| DEFAULT_EMBEDDING_BASE_URL.to_string()),
            },
            jwt_signing_key: env::var(ENV_JWT_SIGNING_KEY).ok().filter(|k| !k.is_empty()),
            frontend_base_url: env::var(ENV_FRONTEND_BASE_URL)
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            session_idle_ttl_secs: SESSION_IDLE_TTL_SECS,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        match self.storage.driver.as_str() {
            STORAGE_DRIVER_MEMORY => {}
            STORAGE_DRIVER_SQLITE => {
                if self.storage.dsn.is_empty() {
                    return Err(GatewayError::config("sqlite storage requires a dsn"));
                }
            }
            other => {
                return Err(GatewayError::config(format!(
                    "Unknown storage driver: {}. Supported: memory, sqlite",
                    other
                )));
            }
        }
        if self.http.host.is_empty() {
            return Err(GatewayError::config("http host must not be empty"));
        }
        if self.session_idle_ttl_secs <= 0 {
            return Err(GatewayError::config("session idle TTL must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod config_test;
