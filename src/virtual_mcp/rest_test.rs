use super::rest::*;
use crate::model::*;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rest_tool(name: &str, http_method: HttpMethod, endpoint: &str, schema: serde_json::Value) -> VirtualMcpTool {
    VirtualMcpTool {
        id: Uuid::new_v4(),
        virtual_mcp_server_id: Uuid::new_v4(),
        name: name.to_string(),
        description: "test tool".to_string(),
        input_schema: schema,
        tool_metadata: VirtualMcpToolMetadata::Rest {
            method: http_method,
            endpoint: endpoint.to_string(),
        },
    }
}

#[test]
fn test_filter_visible_properties() {
    let schema = json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "object",
                "properties": {
                    "q": {"type": "string"},
                    "api_key": {"type": "string", "visible": false, "default": "k"},
                },
                "required": ["q", "api_key"],
            },
        },
        "required": ["query"],
    });

    let filtered = filter_visible_properties(&schema);
    let query_props = &filtered["properties"]["query"]["properties"];
    assert!(query_props.get("q").is_some());
    assert!(query_props.get("api_key").is_none());
    assert_eq!(
        filtered["properties"]["query"]["required"],
        json!(["q"])
    );
}

#[test]
fn test_inject_invisible_defaults() {
    let schema = json!({
        "type": "object",
        "properties": {
            "header": {
                "type": "object",
                "properties": {
                    "X-Version": {"type": "string", "visible": false, "default": "v1"},
                },
                "required": ["X-Version"],
            },
        },
        "required": ["header"],
    });

    let mut arguments = json!({"header": {}});
    inject_required_but_invisible_defaults(&schema, &mut arguments).unwrap();
    assert_eq!(arguments["header"]["X-Version"], "v1");
}

#[test]
fn test_invisible_required_without_default_is_error() {
    let schema = json!({
        "type": "object",
        "properties": {
            "secret": {"type": "string", "visible": false},
        },
        "required": ["secret"],
    });

    let mut arguments = json!({});
    let err = inject_required_but_invisible_defaults(&schema, &mut arguments).unwrap_err();
    assert!(err.to_string().contains("no default"));
}

#[test]
fn test_remove_none_values() {
    let mut value = json!({
        "a": null,
        "b": {"c": null, "d": 1},
        "e": [null, {"f": null}],
    });
    remove_none_values(&mut value);
    assert_eq!(value, json!({"b": {"d": 1}, "e": [null, {}]}));
}

#[test]
fn test_validate_arguments_rejects_bad_shape() {
    let schema = json!({
        "type": "object",
        "properties": {"q": {"type": "string"}},
        "required": ["q"],
        "additionalProperties": false,
    });
    assert!(validate_arguments(&schema, &json!({"q": "ok"})).is_ok());
    assert!(validate_arguments(&schema, &json!({})).is_err());
    assert!(validate_arguments(&schema, &json!({"q": 1})).is_err());
}

#[tokio::test]
async fn test_rest_execution_partitions_locations() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/items/42"))
        .and(query_param("verbose", "true"))
        .and(header("x-trace", "trace-1"))
        .and(body_partial_json(json!({"label": "hello"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "42"})))
        .expect(1)
        .mount(&mock)
        .await;

    let tool = rest_tool(
        "SVC__UPDATE_ITEM",
        HttpMethod::POST,
        &format!("{}/v1/items/{{item_id}}", mock.uri()),
        json!({"type": "object"}),
    );
    let arguments = json!({
        "path": {"item_id": 42},
        "query": {"verbose": true},
        "header": {"x-trace": "trace-1"},
        "body": {"label": "hello"},
    });

    let executor = RestExecutor::new(reqwest::Client::new());
    let result = executor.execute(&tool, &arguments, None).await;
    assert!(!result.is_error());
    assert_eq!(result.content[0].as_text(), Some("{\"id\":\"42\"}"));
}

#[tokio::test]
async fn test_rest_auth_injection_query() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("api_key", "sekrit"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock)
        .await;

    let tool = rest_tool(
        "SVC__SEARCH",
        HttpMethod::GET,
        &format!("{}/search", mock.uri()),
        json!({"type": "object"}),
    );
    let auth_token = AuthTokenData {
        location: HttpLocation::Query,
        name: "api_key".to_string(),
        prefix: None,
        token: "sekrit".to_string(),
    };

    let executor = RestExecutor::new(reqwest::Client::new());
    let result = executor.execute(&tool, &json!({}), Some(&auth_token)).await;
    assert!(!result.is_error());
}

#[tokio::test]
async fn test_rest_auth_injection_header_with_prefix() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": "x"})))
        .expect(1)
        .mount(&mock)
        .await;

    let tool = rest_tool(
        "SVC__ME",
        HttpMethod::GET,
        &format!("{}/me", mock.uri()),
        json!({"type": "object"}),
    );
    let auth_token = AuthTokenData {
        location: HttpLocation::Header,
        name: "Authorization".to_string(),
        prefix: Some("Bearer".to_string()),
        token: "tok".to_string(),
    };

    let executor = RestExecutor::new(reqwest::Client::new());
    let result = executor.execute(&tool, &json!({}), Some(&auth_token)).await;
    assert!(!result.is_error());
}

#[tokio::test]
async fn test_rest_error_status_becomes_error_result() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fail"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"error": "forbidden"})),
        )
        .mount(&mock)
        .await;

    let tool = rest_tool(
        "SVC__FAIL",
        HttpMethod::GET,
        &format!("{}/fail", mock.uri()),
        json!({"type": "object"}),
    );

    let executor = RestExecutor::new(reqwest::Client::new());
    let result = executor.execute(&tool, &json!({}), None).await;
    assert!(result.is_error());
    assert!(
        result.content[0]
            .as_text()
            .unwrap()
            .contains("forbidden")
    );
}

#[tokio::test]
async fn test_rest_binary_response_is_base64() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(vec![0u8, 159, 146, 150]),
        )
        .mount(&mock)
        .await;

    let tool = rest_tool(
        "SVC__BLOB",
        HttpMethod::GET,
        &format!("{}/blob", mock.uri()),
        json!({"type": "object"}),
    );

    let executor = RestExecutor::new(reqwest::Client::new());
    let result = executor.execute(&tool, &json!({}), None).await;
    assert!(!result.is_error());
    use base64::Engine;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(result.content[0].as_text().unwrap())
        .unwrap();
    assert_eq!(decoded, vec![0u8, 159, 146, 150]);
}

#[tokio::test]
async fn test_rest_text_response_decoded() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain; charset=utf-8")
                .set_body_string("plain text"),
        )
        .mount(&mock)
        .await;

    let tool = rest_tool(
        "SVC__PLAIN",
        HttpMethod::GET,
        &format!("{}/plain", mock.uri()),
        json!({"type": "object"}),
    );

    let executor = RestExecutor::new(reqwest::Client::new());
    let result = executor.execute(&tool, &json!({}), None).await;
    assert_eq!(result.content[0].as_text(), Some("plain text"));
}

#[tokio::test]
async fn test_rest_auth_path_location_is_error_result() {
    let tool = rest_tool(
        "SVC__X",
        HttpMethod::GET,
        "http://127.0.0.1:1/x",
        json!({"type": "object"}),
    );
    let auth_token = AuthTokenData {
        location: HttpLocation::Path,
        name: "k".to_string(),
        prefix: None,
        token: "v".to_string(),
    };

    let executor = RestExecutor::new(reqwest::Client::new());
    let result = executor.execute(&tool, &json!({}), Some(&auth_token)).await;
    assert!(result.is_error());
}
