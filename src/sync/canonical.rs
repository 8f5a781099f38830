//! Canonical-name sanitization and content hashing
//!
//! Upstream tool names are normalized into the gateway grammar, and
//! descriptions / input schemas are hashed after normalization so that
//! formatting-only changes never count as catalog changes.

use sha2::{Digest, Sha256};

use crate::{GatewayError, Result};

/// Sanitize an upstream canonical name into `[A-Z0-9_]+`
///
/// Uppercases, collapses every run of other characters into a single `_`,
/// and strips leading/trailing underscores. An empty result is an error.
pub fn sanitize_canonical_name(canonical_name: &str) -> Result<String> {
    let mut sanitized = String::with_capacity(canonical_name.len());
    let mut last_was_underscore = false;

    for c in canonical_name.chars() {
        let mapped = match c.to_ascii_uppercase() {
            upper @ ('A'..='Z' | '0'..='9') => Some(upper),
            _ => None,
        };
        match mapped {
            Some(upper) => {
                sanitized.push(upper);
                last_was_underscore = false;
            }
            None => {
                if !last_was_underscore && !sanitized.is_empty() {
                    sanitized.push('_');
                }
                last_was_underscore = true;
            }
        }
    }

    let sanitized = sanitized.trim_end_matches('_').to_string();
    if sanitized.is_empty() {
        return Err(GatewayError::SanitizationEmpty(canonical_name.to_string()));
    }
    Ok(sanitized)
}

/// Hash a text after normalization: lowercase, keep only `[a-z0-9]`
pub fn normalize_and_hash_text(content: &str) -> String {
    let normalized: String = content
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();
    sha256_hex(normalized.as_bytes())
}

/// Hash a JSON value after normalization: keys sorted lexicographically,
/// no insignificant whitespace
pub fn normalize_and_hash_json(content: &serde_json::Value) -> String {
    let mut canonical = String::new();
    write_canonical_json(content, &mut canonical);
    sha256_hex(canonical.as_bytes())
}

fn write_canonical_json(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical_json(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
