use super::*;
use crate::storage::{MemoryStorage, VirtualMcpStorage};
use axum::body::Body;
use std::sync::Arc;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method as http_method, path as http_path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn test_parse_auth_token_four_fields() {
    let token = parse_auth_token("header Authorization Bearer 1234567890").unwrap();
    assert_eq!(token.location, HttpLocation::Header);
    assert_eq!(token.name, "Authorization");
    assert_eq!(token.prefix.as_deref(), Some("Bearer"));
    assert_eq!(token.token, "1234567890");
}

#[test]
fn test_parse_auth_token_three_fields() {
    let token = parse_auth_token("query api_key 1234567890").unwrap();
    assert_eq!(token.location, HttpLocation::Query);
    assert_eq!(token.name, "api_key");
    assert_eq!(token.prefix, None);
    assert_eq!(token.token, "1234567890");
}

#[test]
fn test_parse_auth_token_rejects_bad_shapes() {
    assert!(parse_auth_token("header Authorization").is_err());
    assert!(parse_auth_token("header a b c d").is_err());
    assert!(parse_auth_token("teapot api_key 123").is_err());
    assert!(parse_auth_token("").is_err());
}

#[test]
fn test_format_auth_token_round_trip() {
    for raw in [
        "header Authorization Bearer tok",
        "cookie session tok",
        "body access_token tok",
    ] {
        let parsed = parse_auth_token(raw).unwrap();
        assert_eq!(format_auth_token(&parsed), raw);
        assert_eq!(parse_auth_token(&format_auth_token(&parsed)).unwrap(), parsed);
    }
}

async fn service_with_rest_tool(endpoint: &str) -> Arc<VirtualMcpService> {
    let storage = Arc::new(MemoryStorage::new());
    let server = VirtualMcpServer {
        id: Uuid::new_v4(),
        name: "BRAVE_SEARCH".to_string(),
        description: "Brave search".to_string(),
    };
    storage.create_virtual_server(&server).await.unwrap();
    storage
        .create_virtual_tools(&[VirtualMcpTool {
            id: Uuid::new_v4(),
            virtual_mcp_server_id: server.id,
            name: "BRAVE_SEARCH__WEB_SEARCH".to_string(),
            description: "Search the web".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "object",
                        "properties": {
                            "q": {"type": "string"},
                            "count": {"type": "integer", "visible": false, "default": 5},
                        },
                        "required": ["q", "count"],
                    },
                },
                "required": ["query"],
            }),
            tool_metadata: VirtualMcpToolMetadata::Rest {
                method: HttpMethod::GET,
                endpoint: endpoint.to_string(),
            },
        }])
        .await
        .unwrap();

    Arc::new(VirtualMcpService::new(
        storage,
        ConnectorRegistry::new(),
        reqwest::Client::new(),
    ))
}

async fn post_rpc(
    router: &axum::Router,
    server_name: &str,
    body: serde_json::Value,
    auth_header: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(format!("/virtual/mcp?server_name={}", server_name))
        .header("content-type", "application/json");
    if let Some(auth_header) = auth_header {
        request = request.header("x-virtual-mcp-auth-token", auth_header);
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_initialize_reports_server_name() {
    let service = service_with_rest_tool("http://127.0.0.1:1/x").await;
    let router = create_virtual_mcp_routes(service);

    let (status, body) = post_rpc(
        &router,
        "BRAVE_SEARCH",
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": "2025-06-18", "capabilities": {}, "clientInfo": {}},
        }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["serverInfo"]["name"], "ACI.dev BRAVE_SEARCH MCP");
}

#[tokio::test]
async fn test_tools_list_hides_invisible_properties() {
    let service = service_with_rest_tool("http://127.0.0.1:1/x").await;
    let router = create_virtual_mcp_routes(service);

    let (status, body) = post_rpc(
        &router,
        "BRAVE_SEARCH",
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    // canonical (suffix) name on the wire
    assert_eq!(tools[0]["name"], "WEB_SEARCH");
    let query_schema = &tools[0]["inputSchema"]["properties"]["query"];
    assert!(query_schema["properties"].get("count").is_none());
    assert_eq!(query_schema["required"], json!(["q"]));
}

#[tokio::test]
async fn test_tools_call_executes_with_injected_defaults_and_auth() {
    let mock = MockServer::start().await;
    Mock::given(http_method("GET"))
        .and(http_path("/search"))
        .and(wiremock::matchers::query_param("q", "rust"))
        .and(wiremock::matchers::query_param("count", "5"))
        .and(wiremock::matchers::query_param("api_key", "sekrit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&mock)
        .await;

    let service = service_with_rest_tool(&format!("{}/search", mock.uri())).await;
    let router = create_virtual_mcp_routes(service);

    let (status, body) = post_rpc(
        &router,
        "BRAVE_SEARCH",
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "WEB_SEARCH", "arguments": {"query": {"q": "rust"}}},
        }),
        Some("query api_key sekrit"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("error").is_none(), "unexpected error: {}", body);
    assert_eq!(body["result"]["content"][0]["type"], "text");
}

#[tokio::test]
async fn test_tools_call_unknown_tool() {
    let service = service_with_rest_tool("http://127.0.0.1:1/x").await;
    let router = create_virtual_mcp_routes(service);

    let (_, body) = post_rpc(
        &router,
        "BRAVE_SEARCH",
        json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "NOPE", "arguments": {}},
        }),
        None,
    )
    .await;
    assert_eq!(body["error"]["code"], -32600);
    assert!(body["error"]["message"].as_str().unwrap().contains("NOPE"));
}

#[tokio::test]
async fn test_unknown_server_name() {
    let service = service_with_rest_tool("http://127.0.0.1:1/x").await;
    let router = create_virtual_mcp_routes(service);

    let (_, body) = post_rpc(
        &router,
        "MISSING",
        json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}),
        None,
    )
    .await;
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn test_invalid_arguments_rejected_by_schema() {
    let service = service_with_rest_tool("http://127.0.0.1:1/x").await;
    let router = create_virtual_mcp_routes(service);

    let (_, body) = post_rpc(
        &router,
        "BRAVE_SEARCH",
        json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "tools/call",
            // missing required "query"
            "params": {"name": "WEB_SEARCH", "arguments": {}},
        }),
        None,
    )
    .await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn test_notification_returns_202() {
    let service = service_with_rest_tool("http://127.0.0.1:1/x").await;
    let router = create_virtual_mcp_routes(service);

    let (status, body) = post_rpc(
        &router,
        "BRAVE_SEARCH",
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, serde_json::Value::Null);
}

#[tokio::test]
async fn test_get_is_405_delete_is_204() {
    let service = service_with_rest_tool("http://127.0.0.1:1/x").await;
    let router = create_virtual_mcp_routes(service);

    let get_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/virtual/mcp?server_name=BRAVE_SEARCH")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get_response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let delete_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/virtual/mcp?server_name=BRAVE_SEARCH")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete_response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_invalid_auth_token_header_is_rpc_error() {
    let service = service_with_rest_tool("http://127.0.0.1:1/x").await;
    let router = create_virtual_mcp_routes(service);

    let (_, body) = post_rpc(
        &router,
        "BRAVE_SEARCH",
        json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}),
        Some("only-two fields"),
    )
    .await;
    assert!(body.get("error").is_some());
}
