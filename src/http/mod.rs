//! HTTP server for the gateway
//!
//! Assembles the MCP endpoint (`POST /mcp?bundle_id=...`), the virtual MCP
//! endpoint, health and metrics into one axum router. The MCP endpoint is a
//! JSON-RPC surface: protocol failures come back as JSON-RPC error
//! envelopes with HTTP 200, never as HTTP errors.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use uuid::Uuid;

use crate::config::Config;
use crate::constants::*;
use crate::credentials::CredentialManager;
use crate::embedding::create_embedding_client;
use crate::model::*;
use crate::router::{GATEWAY_TOOLS, ToolRouter};
use crate::rpc::{self, JsonRpcFailure, JsonRpcSuccess, McpRequest};
use crate::session::SessionManager;
use crate::storage::{Storage, create_storage_from_config};
use crate::virtual_mcp::{ConnectorRegistry, VirtualMcpService, create_virtual_mcp_routes};
use crate::{GatewayError, Result};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub sessions: SessionManager,
    pub router: ToolRouter,
    pub virtual_mcp: Arc<VirtualMcpService>,
    pub jwt_signing_key: Option<String>,
}

impl AppState {
    /// Wire up storage, clients and managers from configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        let storage = create_storage_from_config(&config.storage).await?;
        let http_client = build_http_client()?;

        let embedding = create_embedding_client(&config.embedding, http_client.clone());
        let credentials = CredentialManager::new(storage.clone(), http_client.clone());
        let sessions = SessionManager::new(
            storage.clone(),
            credentials.clone(),
            http_client.clone(),
            config.session_idle_ttl_secs,
        );
        let virtual_mcp = Arc::new(VirtualMcpService::new(
            storage.clone(),
            ConnectorRegistry::with_builtins(http_client.clone()),
            http_client.clone(),
        ));
        let router = ToolRouter::new(
            storage.clone(),
            credentials,
            embedding,
            sessions.clone(),
            virtual_mcp.clone(),
            http_client,
        );

        Ok(Self {
            storage,
            sessions,
            router,
            virtual_mcp,
            jwt_signing_key: config.jwt_signing_key.clone(),
        })
    }
}

/// Shared outbound HTTP client with the gateway's upstream deadlines
pub fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(UPSTREAM_CONNECT_TIMEOUT_SECS))
        .read_timeout(Duration::from_secs(UPSTREAM_READ_TIMEOUT_SECS))
        .build()
        .map_err(|e| GatewayError::config(format!("Failed to build HTTP client: {}", e)))
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let state = AppState::from_config(&config).await?;
    let app = build_router(state)?;

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|e| GatewayError::config(format!("Invalid address {}: {}", addr, e)))?;

    tracing::info!("Starting gateway HTTP server on {}", socket_addr);

    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| GatewayError::config(format!("Server error: {}", e)))?;

    Ok(())
}

/// Build the router with all endpoints
pub fn build_router(state: AppState) -> Result<Router> {
    let virtual_mcp_routes = create_virtual_mcp_routes(state.virtual_mcp.clone());

    Ok(Router::new()
        .route("/mcp", any(mcp_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(virtual_mcp_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    REQUEST_ID_HEADER.parse().expect("valid header name"),
                    MakeRequestUuid,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().include_headers(false))
                        .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
                )
                .layer(PropagateRequestIdLayer::new(
                    REQUEST_ID_HEADER.parse().expect("valid header name"),
                )),
        ))
}

#[derive(Deserialize)]
struct McpQuery {
    bundle_id: Option<Uuid>,
}

async fn mcp_handler(
    State(state): State<AppState>,
    Query(query): Query<McpQuery>,
    headers: HeaderMap,
    method: axum::http::Method,
    body: bytes::Bytes,
) -> Response {
    match method {
        axum::http::Method::POST => {}
        axum::http::Method::DELETE => {
            // client-initiated teardown; the session row is soft-deleted and
            // anything missed is swept by TTL
            if let Some(session_id) = session_id_from_headers(&headers) {
                let _ = state.sessions.delete_session(session_id).await;
            }
            return StatusCode::NO_CONTENT.into_response();
        }
        _ => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }

    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    crate::telemetry::record_mcp_request("post");

    let protocol_version = headers
        .get(MCP_PROTOCOL_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = match rpc::parse_payload(&body) {
        Ok(request) => request,
        Err(error) => {
            tracing::error!(error = %error, "failed to parse MCP payload");
            return Json(JsonRpcFailure::from_error(None, &error)).into_response();
        }
    };

    // 202 is load-bearing: some clients stall on other statuses, and a
    // notification never gets an error body
    if matches!(request, McpRequest::NotificationInitialized) {
        return StatusCode::ACCEPTED.into_response();
    }

    let Some(bundle_id) = query.bundle_id else {
        let error = GatewayError::Rpc(crate::error::RpcError::InvalidRequest {
            message: "missing bundle_id query parameter".to_string(),
            id: request.id().cloned(),
        });
        return Json(JsonRpcFailure::from_error(request.id().cloned(), &error)).into_response();
    };

    let bundle = match state.storage.get_bundle(bundle_id).await {
        Ok(Some(bundle)) => bundle,
        Ok(None) => {
            tracing::error!(bundle_id = %bundle_id, "bundle not found");
            let error = GatewayError::BundleNotFound(bundle_id);
            return Json(JsonRpcFailure::from_error(request.id().cloned(), &error))
                .into_response();
        }
        Err(error) => {
            return Json(JsonRpcFailure::from_error(request.id().cloned(), &error))
                .into_response();
        }
    };

    match request {
        McpRequest::Initialize { id, params } => {
            tracing::info!(bundle_id = %bundle.id, "received initialize request");
            let session = match state.sessions.initialize_session(&bundle).await {
                Ok(session) => session,
                Err(error) => {
                    return Json(JsonRpcFailure::from_error(Some(id), &error)).into_response();
                }
            };

            let result = json!({
                "protocolVersion": protocol_version
                    .unwrap_or_else(|| params.protocol_version.clone()),
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {
                    "name": GATEWAY_SERVER_NAME,
                    "title": GATEWAY_SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "instructions": GATEWAY_INSTRUCTIONS,
            });
            with_session_header(
                Json(JsonRpcSuccess::new(id, result)).into_response(),
                session.id,
            )
        }

        McpRequest::ToolsList { id } => {
            let tools: Vec<Value> = GATEWAY_TOOLS
                .iter()
                .map(|tool| serde_json::to_value(tool).unwrap_or_default())
                .collect();
            Json(JsonRpcSuccess::new(id, json!({ "tools": tools }))).into_response()
        }

        McpRequest::ToolsCall { id, params } => {
            let session = match resolve_or_create_session(&state, &headers, &bundle).await {
                Ok(session) => session,
                Err(error) => {
                    return Json(JsonRpcFailure::from_error(Some(id), &error)).into_response();
                }
            };

            tracing::info!(bundle_id = %bundle.id, tool = %params.name, "received tools/call");
            crate::telemetry::record_tool_call(&params.name);
            match state
                .router
                .call_tool(&bundle, &session, &params.name, &params.arguments)
                .await
            {
                Ok(result) => {
                    let result = serde_json::to_value(&result).unwrap_or_default();
                    with_session_header(
                        Json(JsonRpcSuccess::new(id, result)).into_response(),
                        session.id,
                    )
                }
                Err(error) => {
                    tracing::error!(tool = %params.name, error = %error, "tools/call failed");
                    with_session_header(
                        Json(JsonRpcFailure::from_error(Some(id), &error)).into_response(),
                        session.id,
                    )
                }
            }
        }

        // handled before the bundle lookup
        McpRequest::NotificationInitialized => StatusCode::ACCEPTED.into_response(),

        McpRequest::Ping { id } => Json(JsonRpcSuccess::new(id, json!({}))).into_response(),
    }
}

/// Look up the session named in the request header. A missing, expired or
/// foreign session id gets a fresh (empty) session row: upstream session ids
/// will be discovered lazily on the first call to each upstream.
async fn resolve_or_create_session(
    state: &AppState,
    headers: &HeaderMap,
    bundle: &McpServerBundle,
) -> Result<McpSession> {
    if let Some(session_id) = session_id_from_headers(headers)
        && let Some(session) = state.sessions.resolve_session(session_id).await?
        && session.bundle_id == bundle.id
    {
        return Ok(session);
    }

    let session = McpSession {
        id: Uuid::new_v4(),
        bundle_id: bundle.id,
        external_mcp_sessions: Default::default(),
        last_accessed_at: chrono::Utc::now(),
        deleted: false,
    };
    state.storage.create_session(&session).await?;
    Ok(session)
}

fn session_id_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn with_session_header(mut response: Response, session_id: Uuid) -> Response {
    if let Ok(value) = HeaderValue::from_str(&session_id.to_string()) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    response
}

/// Bearer check on the MCP endpoint; disabled when no signing key is
/// configured (local development)
fn authorize(state: &AppState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Some(signing_key) = &state.jwt_signing_key else {
        return Ok(());
    };

    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "));
    let Some(token) = token else {
        return Err((StatusCode::UNAUTHORIZED, "Missing bearer token").into_response());
    };

    #[derive(Deserialize)]
    struct Claims {
        #[allow(dead_code)]
        sub: String,
    }

    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.validate_exp = true;
    match jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(signing_key.as_bytes()),
        &validation,
    ) {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::warn!(error = %e, "MCP bearer token rejected");
            Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response())
        }
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler() -> Response {
    match crate::telemetry::gather_metrics() {
        Ok(metrics) => (StatusCode::OK, metrics).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to gather metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}
