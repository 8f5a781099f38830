//! Shared helpers for SQL storage backends
//!
//! Enum/string conversions and JSON column codecs used by the SQLite backend.

use crate::model::*;
use crate::{GatewayError, Result};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub fn transport_to_str(transport: TransportType) -> &'static str {
    match transport {
        TransportType::StreamableHttp => "streamable_http",
        TransportType::Sse => "sse",
    }
}

pub fn parse_transport(s: &str) -> TransportType {
    match s {
        "sse" => TransportType::Sse,
        _ => TransportType::StreamableHttp,
    }
}

pub fn auth_type_to_str(auth_type: AuthType) -> &'static str {
    auth_type.as_str()
}

pub fn parse_auth_type(s: &str) -> AuthType {
    match s {
        "api_key" => AuthType::ApiKey,
        "oauth2" => AuthType::Oauth2,
        _ => AuthType::NoAuth,
    }
}

pub fn ownership_to_str(ownership: ConnectedAccountOwnership) -> &'static str {
    ownership.as_str()
}

pub fn parse_ownership(s: &str) -> ConnectedAccountOwnership {
    match s {
        "shared" => ConnectedAccountOwnership::Shared,
        "operational" => ConnectedAccountOwnership::Operational,
        _ => ConnectedAccountOwnership::Individual,
    }
}

pub fn identity_provider_to_str(provider: IdentityProvider) -> &'static str {
    match provider {
        IdentityProvider::Password => "password",
        IdentityProvider::Google => "google",
    }
}

pub fn parse_identity_provider(s: &str) -> IdentityProvider {
    match s {
        "google" => IdentityProvider::Google,
        _ => IdentityProvider::Password,
    }
}

/// Serialize an embedding vector to its JSON column representation
pub fn embedding_to_json(embedding: &[f32]) -> Result<String> {
    serde_json::to_string(embedding).map_err(GatewayError::from)
}

/// Parse an embedding vector from its JSON column representation
pub fn parse_embedding(raw: &str) -> Result<Vec<f32>> {
    serde_json::from_str(raw).map_err(GatewayError::from)
}

/// Serialize a set of UUIDs to a JSON column
pub fn uuid_set_to_json(ids: &HashSet<Uuid>) -> Result<String> {
    let mut sorted: Vec<&Uuid> = ids.iter().collect();
    sorted.sort();
    serde_json::to_string(&sorted).map_err(GatewayError::from)
}

/// Parse a set of UUIDs from a JSON column
pub fn parse_uuid_set(raw: &str) -> Result<HashSet<Uuid>> {
    serde_json::from_str(raw).map_err(GatewayError::from)
}

/// Serialize an ordered list of UUIDs to a JSON column
pub fn uuid_list_to_json(ids: &[Uuid]) -> Result<String> {
    serde_json::to_string(ids).map_err(GatewayError::from)
}

/// Parse an ordered list of UUIDs from a JSON column
pub fn parse_uuid_list(raw: &str) -> Result<Vec<Uuid>> {
    serde_json::from_str(raw).map_err(GatewayError::from)
}

/// Serialize the upstream-session map (keys become strings)
pub fn session_map_to_json(map: &HashMap<Uuid, String>) -> Result<String> {
    let stringly: HashMap<String, &String> =
        map.iter().map(|(k, v)| (k.to_string(), v)).collect();
    serde_json::to_string(&stringly).map_err(GatewayError::from)
}

/// Parse the upstream-session map
pub fn parse_session_map(raw: &str) -> Result<HashMap<Uuid, String>> {
    let stringly: HashMap<String, String> = serde_json::from_str(raw)?;
    let mut map = HashMap::with_capacity(stringly.len());
    for (k, v) in stringly {
        map.insert(Uuid::parse_str(&k)?, v);
    }
    Ok(map)
}

/// Build a `?, ?, ?` placeholder list for an IN clause
pub fn in_placeholders(count: usize) -> String {
    let mut placeholders = String::with_capacity(count * 3);
    for i in 0..count {
        if i > 0 {
            placeholders.push_str(", ");
        }
        placeholders.push('?');
    }
    placeholders
}
