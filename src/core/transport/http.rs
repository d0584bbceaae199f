//! HTTP transport implementation.
//!
//! HTTP server with JSON-RPC over POST requests. A body is decoded exactly
//! like a stdio line, so plain HTTP clients (curl, browsers, etc.) can send
//! either MCP requests or direct tool calls.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use http::StatusCode;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

use super::{TransportError, TransportResult, config::HttpConfig};
use crate::core::McpServer;
use crate::core::lifecycle::stop_requested;
use crate::core::protocol::{DecodeError, ErrorCode, JsonRpcResponse, decode_frame};

/// HTTP transport handler.
pub struct HttpTransport {
    config: HttpConfig,
    max_body_bytes: usize,
}

/// Application state shared across HTTP handlers.
#[derive(Clone)]
struct AppState {
    server: McpServer,
    rpc_path: Arc<str>,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given config.
    pub fn new(config: HttpConfig, max_body_bytes: usize) -> Self {
        Self {
            config,
            max_body_bytes,
        }
    }

    /// Get the bind address.
    pub fn address(&self) -> String {
        self.config.address()
    }

    /// Build the router: `POST {rpc_path}`, `GET /health` and `GET /`.
    pub fn router(&self, server: McpServer) -> Router {
        let state = AppState {
            server,
            rpc_path: Arc::from(self.config.rpc_path.as_str()),
        };

        let mut app = Router::new()
            .route(&self.config.rpc_path, post(handle_rpc))
            .route("/health", get(health_check))
            .route("/", get(root_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(DefaultBodyLimit::max(self.max_body_bytes)),
            );

        // Add CORS if enabled
        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            app = app.layer(cors);
        }

        app
    }

    /// Bind and serve until the server starts stopping.
    pub async fn run(self, server: McpServer) -> TransportResult<()> {
        let addr = self.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::bind(&addr, e))?;
        self.serve(listener, server).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener, server: McpServer) -> TransportResult<()> {
        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.address());
        let mut state = server.subscribe_state();
        let app = self.router(server);

        let cors_status = if self.config.enable_cors {
            "enabled"
        } else {
            "disabled"
        };
        info!(
            "Ready - listening on {} (JSON-RPC over HTTP, CORS {})",
            local, cors_status
        );
        info!("  → JSON-RPC: POST {}", self.config.rpc_path);
        info!("  → Health:   GET /health");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop_requested(&mut state).await })
            .await
            .map_err(|e| TransportError::http(e.to_string()))?;

        info!("HTTP transport finished");
        Ok(())
    }
}

/// HTTP status for an error frame.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ToolExecutionError => StatusCode::OK,
        ErrorCode::TransportDecodeError
        | ErrorCode::UnknownTool
        | ErrorCode::InvalidArguments
        | ErrorCode::UnknownMethod => StatusCode::BAD_REQUEST,
        ErrorCode::WorkerStartError | ErrorCode::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::TimeoutError => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::WorkerCrashedError | ErrorCode::InternalError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn rpc_response(response: JsonRpcResponse) -> Response {
    let status = response.error_code().map_or(StatusCode::OK, status_for);
    (status, Json(response)).into_response()
}

/// Root handler - provides API info.
async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": state.server.name(),
        "version": state.server.version(),
        "transport": "HTTP",
        "endpoints": {
            "rpc": &*state.rpc_path,
            "health": "/health"
        },
        "protocol": "JSON-RPC 2.0",
        "documentation": format!(
            "POST JSON-RPC requests or direct {{id, tool, args}} calls to {}",
            state.rpc_path
        )
    }))
}

/// Health check endpoint. 503 once the server is stopping.
async fn health_check(State(state): State<AppState>) -> Response {
    let report = state.server.health();
    let status = if report.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// Handle one JSON-RPC or direct-call frame.
#[instrument(skip_all)]
async fn handle_rpc(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!("Rejected request body: {}", rejection.body_text());
            let error = DecodeError::new(None, rejection.body_text()).into_response();
            return (rejection.status(), Json(error)).into_response();
        }
    };

    let inbound = match decode_frame(&body) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!("Rejected frame: {}", e);
            return rpc_response(e.into_response());
        }
    };

    match state.server.handle_inbound(inbound).await {
        Some(response) => rpc_response(response),
        None => {
            debug!("Notification accepted");
            StatusCode::ACCEPTED.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::server::tests::test_server;
    use crate::core::worker::testing::FakeLauncher;
    use http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(server: McpServer) -> Router {
        HttpTransport::new(HttpConfig::default(), 4096).router(server)
    }

    async fn post_rpc(app: Router, body: impl Into<String>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.into()))
            .unwrap();
        send(app, request).await
    }

    async fn get_path(app: Router, path: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(path)
            .body(axum::body::Body::empty())
            .unwrap();
        send(app, request).await
    }

    async fn send(app: Router, request: Request<axum::body::Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorCode::ToolExecutionError), StatusCode::OK);
        assert_eq!(status_for(ErrorCode::UnknownTool), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::WorkerStartError), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorCode::TimeoutError), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(ErrorCode::WorkerCrashedError),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_direct_call_over_post() {
        let server = test_server(FakeLauncher::new());
        let (status, body) = post_rpc(
            app(server),
            r#"{"id":"1","tool":"create_cube","args":{"name":"Cube","location":[0,0,0],"size":2.0}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "1");
        assert!(body["result"].as_str().unwrap().starts_with("Created cube 'Cube'"));
    }

    #[tokio::test]
    async fn test_tools_list_and_call() {
        let server = test_server(FakeLauncher::new());
        let (status, body) = post_rpc(
            app(server.clone()),
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["result"]["tools"].as_array().unwrap().len() >= 10);

        let (status, body) = post_rpc(
            app(server),
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"list_objects","arguments":{}}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let server = test_server(FakeLauncher::new());

        let (status, body) = post_rpc(app(server.clone()), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "TransportDecodeError");
        assert!(body["id"].is_null());

        let (status, body) = post_rpc(app(server.clone()), r#"{"id":3,"tool":"create_cone"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "UnknownTool");

        let (status, body) = post_rpc(
            app(server),
            r#"{"id":4,"tool":"create_cube","args":{"size":"huge"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "InvalidArguments");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_gateway_timeout() {
        let mut config = crate::core::Config::default();
        config.limits.timeout = Duration::from_millis(100);
        config.worker.terminate_grace = Duration::from_millis(50);
        let server = McpServer::with_launcher(
            config,
            FakeLauncher::new().hang_on("list_objects").into_arc(),
        )
        .unwrap();

        let (status, body) = post_rpc(app(server), r#"{"id":5,"tool":"list_objects"}"#).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"]["code"], "TimeoutError");
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_body() {
        let server = test_server(FakeLauncher::new());
        let (status, body) = post_rpc(
            app(server),
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.is_null());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let server = test_server(FakeLauncher::new());
        let big = json!({ "id": 1, "tool": "create_cube", "args": { "name": "x".repeat(8192) } });
        let (status, body) = post_rpc(app(server), big.to_string()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"]["code"], "TransportDecodeError");
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let server = test_server(FakeLauncher::new());
        let (status, body) = get_path(app(server.clone()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["worker"]["state"], "idle");

        let (status, body) = get_path(app(server.clone()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["endpoints"]["rpc"], "/mcp");

        server.shutdown().await;
        let (status, body) = get_path(app(server.clone()), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "stopping");

        let (status, body) = post_rpc(app(server), r#"{"id":6,"tool":"list_objects"}"#).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "ShuttingDown");
    }

    #[tokio::test]
    async fn test_serve_stops_with_server() {
        let server = test_server(FakeLauncher::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = HttpTransport::new(HttpConfig::default(), 4096);
        let handle = tokio::spawn(transport.serve(listener, server.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown().await;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
