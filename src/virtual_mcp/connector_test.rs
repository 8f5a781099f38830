use super::connector::*;
use super::connectors::gmail::GmailConnector;
use crate::model::*;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector_tool(name: &str) -> VirtualMcpTool {
    VirtualMcpTool {
        id: Uuid::new_v4(),
        virtual_mcp_server_id: Uuid::new_v4(),
        name: name.to_string(),
        description: "test".to_string(),
        input_schema: json!({"type": "object"}),
        tool_metadata: VirtualMcpToolMetadata::Connector,
    }
}

struct EchoConnector;

#[async_trait]
impl Connector for EchoConnector {
    fn server_name(&self) -> &'static str {
        "ECHO"
    }

    async fn call(
        &self,
        method: &str,
        arguments: &Map<String, Value>,
        _auth_token: Option<&AuthTokenData>,
    ) -> CallToolResult {
        match method {
            "say" => structured_result(json!({"echo": arguments.get("text")})),
            "boom" => panic!("connector exploded"),
            other => method_not_found(other),
        }
    }
}

fn registry_with_echo() -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(EchoConnector));
    registry
}

#[tokio::test]
async fn test_dispatch_by_lowercased_suffix() {
    let registry = registry_with_echo();
    let result = registry
        .execute(&connector_tool("ECHO__SAY"), &json!({"text": "hi"}), None)
        .await;
    assert!(!result.is_error());
    assert_eq!(result.structured_content.unwrap()["echo"], "hi");
}

#[tokio::test]
async fn test_unknown_method_is_error_result() {
    let registry = registry_with_echo();
    let result = registry
        .execute(&connector_tool("ECHO__NOPE"), &json!({}), None)
        .await;
    assert!(result.is_error());
    assert!(result.content[0].as_text().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_unregistered_connector_is_error_result() {
    let registry = registry_with_echo();
    let result = registry
        .execute(&connector_tool("MISSING__SAY"), &json!({}), None)
        .await;
    assert!(result.is_error());
    assert!(result.content[0].as_text().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_connector_panic_is_caught() {
    let registry = registry_with_echo();
    let result = registry
        .execute(&connector_tool("ECHO__BOOM"), &json!({}), None)
        .await;
    assert!(result.is_error());
    assert_eq!(
        result.content[0].as_text(),
        Some("Internal connector error")
    );
}

fn gmail_auth_token() -> AuthTokenData {
    AuthTokenData {
        location: HttpLocation::Header,
        name: "Authorization".to_string(),
        prefix: Some("Bearer".to_string()),
        token: "google-token".to_string(),
    }
}

#[tokio::test]
async fn test_gmail_send_email() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/a%40x/messages/send"))
        .and(header("authorization", "Bearer google-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg-123"})))
        .expect(1)
        .mount(&mock)
        .await;

    let connector = GmailConnector::new(reqwest::Client::new()).with_api_base(mock.uri());
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(connector));

    let arguments = json!({
        "sender": "a@x",
        "recipient": "b@y",
        "body": "hi",
    });
    let result = registry
        .execute(
            &connector_tool("GMAIL__SEND_EMAIL"),
            &arguments,
            Some(&gmail_auth_token()),
        )
        .await;

    assert!(!result.is_error());
    let structured = result.structured_content.unwrap();
    assert_eq!(structured["message_id"], "msg-123");
}

#[tokio::test]
async fn test_gmail_requires_auth_token() {
    let connector = GmailConnector::new(reqwest::Client::new());
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(connector));

    let arguments = json!({"sender": "a@x", "recipient": "b@y", "body": "hi"});
    let result = registry
        .execute(&connector_tool("GMAIL__SEND_EMAIL"), &arguments, None)
        .await;
    assert!(result.is_error());
}

#[tokio::test]
async fn test_gmail_api_error_is_error_result() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "bad token"})))
        .mount(&mock)
        .await;

    let connector = GmailConnector::new(reqwest::Client::new()).with_api_base(mock.uri());
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(connector));

    let arguments = json!({"sender": "a@x", "recipient": "b@y", "body": "hi"});
    let result = registry
        .execute(
            &connector_tool("GMAIL__SEND_EMAIL"),
            &arguments,
            Some(&gmail_auth_token()),
        )
        .await;
    assert!(result.is_error());
    assert!(result.content[0].as_text().unwrap().contains("401"));
}

#[tokio::test]
async fn test_gmail_drafts_create() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/a%40x/drafts"))
        .and(body_partial_json(json!({"message": {}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "draft-9"})))
        .mount(&mock)
        .await;

    let connector = GmailConnector::new(reqwest::Client::new()).with_api_base(mock.uri());
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(connector));

    let arguments = json!({
        "sender": "a@x",
        "recipient": "b@y",
        "body": "draft body",
        "subject": "Draft",
    });
    let result = registry
        .execute(
            &connector_tool("GMAIL__DRAFTS_CREATE"),
            &arguments,
            Some(&gmail_auth_token()),
        )
        .await;
    assert!(!result.is_error());
    assert_eq!(result.structured_content.unwrap()["draft_id"], "draft-9");
}
