//! MCP Server implementation and lifecycle management.
//!
//! [`McpServer`] is the one entry point both transports call: it gates requests
//! on the lifecycle, answers the MCP housekeeping methods itself, and hands tool
//! calls to the [`Dispatcher`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use rmcp::model::{CallToolResult, Content, Tool};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::config::Config;
use super::dispatcher::Dispatcher;
use super::error::Result;
use super::lifecycle::{Lifecycle, ServerState};
use super::protocol::{
    CallStyle, ErrorCode, ErrorObject, Inbound, JsonRpcResponse, Notification, RequestId,
    RpcRequest, ToolOutcome, ToolRequest, ToolResponse,
};
use super::worker::{BridgeSettings, ProcessLauncher, WorkerBridge, WorkerLauncher, WorkerStatus};
use crate::domains::tools::ToolRegistry;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// The main MCP server handler. Cheap to clone.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: Arc<Config>,
    registry: Arc<ToolRegistry>,
    dispatcher: Dispatcher,
    bridge: WorkerBridge,
    lifecycle: Arc<Lifecycle>,
}

/// Body of the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `ok`, `degraded` or `stopping`.
    pub status: &'static str,
    pub server_state: ServerState,
    pub in_flight: usize,
    pub worker: WorkerHealth,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerHealth {
    #[serde(flatten)]
    pub status: WorkerStatus,
    pub restarts: u64,
}

impl HealthReport {
    /// False once the server is stopping.
    pub fn is_live(&self) -> bool {
        !self.server_state.is_shutting_down()
    }
}

impl McpServer {
    /// Create a server whose worker is the configured external process.
    pub fn new(config: Config) -> Result<Self> {
        let launcher = Arc::new(ProcessLauncher::from_config(&config.worker));
        Self::with_launcher(config, launcher)
    }

    /// Create a server with a custom worker launcher.
    pub fn with_launcher(config: Config, launcher: Arc<dyn WorkerLauncher>) -> Result<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(ToolRegistry::with_scene_tools()?);
        let bridge = WorkerBridge::spawn(launcher, BridgeSettings::from_config(&config.worker));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            bridge.clone(),
            config.limits.timeout,
        );
        let lifecycle = Arc::new(Lifecycle::new());

        info!(
            "{} tools registered; tool call timeout {}ms",
            registry.len(),
            config.limits.timeout.as_millis()
        );
        lifecycle.mark_running();

        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                registry,
                dispatcher,
                bridge,
                lifecycle,
            }),
        })
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.inner.config.server.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.inner.config.server.version
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.inner.config
    }

    pub fn state(&self) -> ServerState {
        self.inner.lifecycle.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.inner.lifecycle.subscribe()
    }

    pub fn worker_status(&self) -> WorkerStatus {
        self.inner.bridge.status()
    }

    /// List all available tools.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.inner.registry.list_tools()
    }

    // ========================================================================
    // Request handling
    // ========================================================================

    /// Run one tool call to completion.
    pub async fn submit(&self, request: ToolRequest) -> ToolResponse {
        let Some(_guard) = self.inner.lifecycle.try_begin() else {
            return ToolResponse {
                id: request.id,
                outcome: ToolOutcome::failure(ErrorCode::ShuttingDown, "Server is shutting down"),
            };
        };
        self.inner.dispatcher.handle(request).await
    }

    /// Handle any decoded frame. Notifications yield `None`.
    pub async fn handle_inbound(&self, inbound: Inbound) -> Option<JsonRpcResponse> {
        let id = match &inbound {
            Inbound::Notification(note) => {
                self.handle_notification(note);
                return None;
            }
            Inbound::Request(r) => r.id.clone(),
            Inbound::Direct(t) => t.id.clone(),
        };

        let Some(_guard) = self.inner.lifecycle.try_begin() else {
            return Some(JsonRpcResponse::error(
                Some(id),
                ErrorObject::new(ErrorCode::ShuttingDown, "Server is shutting down"),
            ));
        };

        let routed = AssertUnwindSafe(self.route(inbound)).catch_unwind().await;
        Some(routed.unwrap_or_else(|panic| {
            error!(%id, "Request handler panicked: {}", panic_message(panic.as_ref()));
            JsonRpcResponse::error(
                Some(id),
                ErrorObject::new(ErrorCode::InternalError, "Internal error while handling request"),
            )
        }))
    }

    async fn route(&self, inbound: Inbound) -> JsonRpcResponse {
        match inbound {
            Inbound::Direct(request) => self.call(request).await,
            Inbound::Request(request) => self.handle_request(request).await,
            // Filtered out by `handle_inbound`.
            Inbound::Notification(_) => JsonRpcResponse::error(
                None,
                ErrorObject::new(ErrorCode::InternalError, "notification routed as request"),
            ),
        }
    }

    #[instrument(skip_all, fields(id = %request.id, method = %request.method))]
    async fn handle_request(&self, request: RpcRequest) -> JsonRpcResponse {
        debug!("Processing request");
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(request.id, self.initialize_result()),
            "ping" => JsonRpcResponse::success(request.id, json!({})),
            "tools/list" => {
                let tools = serde_json::to_value(self.list_tools()).unwrap_or_else(|e| {
                    warn!("Failed to encode tool list: {}", e);
                    Value::Array(Vec::new())
                });
                JsonRpcResponse::success(request.id, json!({ "tools": tools }))
            }
            "tools/call" => match tool_call_from_params(request.id.clone(), request.params) {
                Ok(call) => self.call(call).await,
                Err(error) => JsonRpcResponse::error(Some(request.id), error),
            },
            other => {
                warn!("Unknown method: {}", other);
                JsonRpcResponse::error(
                    Some(request.id),
                    ErrorObject::new(ErrorCode::UnknownMethod, format!("Method not found: {}", other)),
                )
            }
        }
    }

    async fn call(&self, request: ToolRequest) -> JsonRpcResponse {
        let style = request.style;
        let response = self.inner.dispatcher.handle(request).await;
        render(response, style)
    }

    fn handle_notification(&self, note: &Notification) {
        match note.method.as_str() {
            "notifications/initialized" => info!("Client initialized"),
            "notifications/cancelled" => debug!(params = %note.params, "Cancellation notice"),
            other => debug!("Ignoring notification: {}", other),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": self.name(),
                "version": self.version()
            },
            "instructions": "Scene tools: create primitives, manage materials, and inspect or edit \
                             objects in the running 3D engine. Call tools/list for parameters."
        })
    }

    // ========================================================================
    // Health and shutdown
    // ========================================================================

    pub fn health(&self) -> HealthReport {
        let server_state = self.state();
        let worker = self.inner.bridge.status();
        let status = if server_state.is_shutting_down() {
            "stopping"
        } else if worker.degraded {
            "degraded"
        } else {
            "ok"
        };

        HealthReport {
            status,
            server_state,
            in_flight: self.inner.lifecycle.in_flight(),
            worker: WorkerHealth {
                restarts: worker.generation.saturating_sub(1),
                status: worker,
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Stop accepting requests, drain in-flight ones (bounded), terminate the
    /// worker. Idempotent; concurrent callers all return once Stopped.
    pub async fn shutdown(&self) {
        let lifecycle = &self.inner.lifecycle;
        if !lifecycle.begin_stop() {
            lifecycle.wait_stopped().await;
            return;
        }

        let pending = lifecycle.in_flight();
        if pending > 0 {
            info!("Stopping: waiting for {} in-flight request(s)", pending);
        }
        let drain = self.inner.config.limits.drain_timeout;
        if !lifecycle.wait_drained(drain).await {
            warn!(
                "{} request(s) still running after {}ms; abandoning them",
                lifecycle.in_flight(),
                drain.as_millis()
            );
        }

        self.inner.bridge.shutdown().await;
        lifecycle.mark_stopped();
        info!("Server stopped");
    }
}

/// Extract `{name, arguments}` from `tools/call` params.
fn tool_call_from_params(id: RequestId, params: Value) -> std::result::Result<ToolRequest, ErrorObject> {
    let Value::Object(mut params) = params else {
        return Err(ErrorObject::new(
            ErrorCode::InvalidArguments,
            "tools/call requires params with a tool name",
        ));
    };
    let tool_name = match params.remove("name") {
        Some(Value::String(name)) => name,
        _ => {
            return Err(ErrorObject::new(
                ErrorCode::InvalidArguments,
                "tools/call requires a string 'name'",
            ));
        }
    };
    Ok(ToolRequest {
        id,
        tool_name,
        arguments: params.remove("arguments").unwrap_or(Value::Null),
        style: CallStyle::Mcp,
    })
}

/// Encode a tool response for the style it was requested in.
fn render(response: ToolResponse, style: CallStyle) -> JsonRpcResponse {
    let value = match response.outcome {
        ToolOutcome::Failure(error) => return JsonRpcResponse::error(Some(response.id), error),
        ToolOutcome::Success(value) => value,
    };

    match style {
        CallStyle::Direct => JsonRpcResponse::success(response.id, value),
        CallStyle::Mcp => {
            let text = match value {
                Value::String(s) => s,
                other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
            };
            let result = CallToolResult::success(vec![Content::text(text)]);
            match serde_json::to_value(result) {
                Ok(result) => JsonRpcResponse::success(response.id, result),
                Err(e) => JsonRpcResponse::error(
                    Some(response.id),
                    ErrorObject::new(ErrorCode::InternalError, format!("Failed to encode result: {}", e)),
                ),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
