use super::canonical::*;
use crate::GatewayError;
use serde_json::json;

#[test]
fn test_sanitize_basic() {
    assert_eq!(sanitize_canonical_name("send_email").unwrap(), "SEND_EMAIL");
    assert_eq!(sanitize_canonical_name("sendEmail").unwrap(), "SENDEMAIL");
    assert_eq!(
        sanitize_canonical_name("search-web.v2").unwrap(),
        "SEARCH_WEB_V2"
    );
    assert_eq!(sanitize_canonical_name("  spaced out  ").unwrap(), "SPACED_OUT");
}

#[test]
fn test_sanitize_collapses_runs_and_trims() {
    assert_eq!(sanitize_canonical_name("a---b").unwrap(), "A_B");
    assert_eq!(sanitize_canonical_name("a__b").unwrap(), "A_B");
    assert_eq!(sanitize_canonical_name("__tool__").unwrap(), "TOOL");
    assert_eq!(sanitize_canonical_name("a_-_b").unwrap(), "A_B");
}

#[test]
fn test_sanitize_output_never_contains_double_underscore() {
    for input in ["a__b", "x!!y", "m . n", "q___r", "one-two_three"] {
        let sanitized = sanitize_canonical_name(input).unwrap();
        assert!(!sanitized.contains("__"), "{} -> {}", input, sanitized);
        assert!(
            sanitized
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        );
    }
}

#[test]
fn test_sanitize_is_idempotent() {
    for input in ["send_email", "search-web.v2", "a---b", "Do It Now!"] {
        let once = sanitize_canonical_name(input).unwrap();
        let twice = sanitize_canonical_name(&once).unwrap();
        assert_eq!(once, twice);
    }
}

#[test]
fn test_sanitize_empty_fails() {
    for input in ["", "---", "...", "日本語"] {
        assert!(matches!(
            sanitize_canonical_name(input),
            Err(GatewayError::SanitizationEmpty(_))
        ));
    }
}

#[test]
fn test_text_hash_ignores_punctuation_and_case() {
    assert_eq!(
        normalize_and_hash_text("Hello, World!"),
        normalize_and_hash_text("hello world")
    );
    assert_eq!(
        normalize_and_hash_text("Send   an\nemail."),
        normalize_and_hash_text("sendanemail")
    );
    assert_ne!(
        normalize_and_hash_text("send email"),
        normalize_and_hash_text("send mail")
    );
}

#[test]
fn test_json_hash_invariant_under_key_order() {
    let a = json!({"type": "object", "properties": {"x": {"type": "string"}, "y": {"type": "integer"}}});
    let b = json!({"properties": {"y": {"type": "integer"}, "x": {"type": "string"}}, "type": "object"});
    assert_eq!(normalize_and_hash_json(&a), normalize_and_hash_json(&b));
}

#[test]
fn test_json_hash_invariant_under_whitespace() {
    let a: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": [1, 2]}"#).unwrap();
    let b: serde_json::Value = serde_json::from_str("{\"a\":1,\"b\":[1,2]}").unwrap();
    assert_eq!(normalize_and_hash_json(&a), normalize_and_hash_json(&b));
}

#[test]
fn test_json_hash_sensitive_to_values_and_array_order() {
    let a = json!({"required": ["x", "y"]});
    let b = json!({"required": ["y", "x"]});
    assert_ne!(normalize_and_hash_json(&a), normalize_and_hash_json(&b));
    assert_ne!(
        normalize_and_hash_json(&json!({"a": 1})),
        normalize_and_hash_json(&json!({"a": 2}))
    );
}

#[test]
fn test_hashes_are_sha256_hex() {
    let hash = normalize_and_hash_text("anything");
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}
