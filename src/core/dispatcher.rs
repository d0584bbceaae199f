//! Request dispatcher: registry lookup, validation, and worker invocation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::protocol::{ErrorCode, ErrorObject, ToolOutcome, ToolRequest, ToolResponse};
use super::worker::{BridgeError, WorkerBridge, WorkerOutcome};
use crate::domains::tools::{ToolError, ToolRegistry};

/// Turns a [`ToolRequest`] into exactly one [`ToolResponse`].
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    bridge: WorkerBridge,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, bridge: WorkerBridge, timeout: Duration) -> Self {
        Self {
            registry,
            bridge,
            timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip_all, fields(id = %request.id, tool = %request.tool_name))]
    pub async fn handle(&self, request: ToolRequest) -> ToolResponse {
        let outcome = self.execute(&request).await;
        match &outcome {
            ToolOutcome::Success(_) => info!("Tool call succeeded"),
            ToolOutcome::Failure(e) => info!(code = %e.code, "Tool call failed: {}", e.message),
        }
        ToolResponse {
            id: request.id,
            outcome,
        }
    }

    async fn execute(&self, request: &ToolRequest) -> ToolOutcome {
        let descriptor = match self.registry.resolve(&request.tool_name) {
            Ok(d) => d,
            Err(e) => return ToolOutcome::failure(ErrorCode::UnknownTool, e.to_string()),
        };

        let arguments = match self.registry.validate(&descriptor, &request.arguments) {
            Ok(args) => args,
            Err(e @ ToolError::InvalidArguments { .. }) => {
                return ToolOutcome::failure(ErrorCode::InvalidArguments, e.to_string());
            }
            Err(e) => return ToolOutcome::failure(ErrorCode::InternalError, e.to_string()),
        };
        debug!(arguments = arguments.len(), "Arguments validated");

        let result = self
            .bridge
            .invoke(descriptor.handler.as_str(), arguments.to_json_map(), self.timeout)
            .await;

        match result {
            Ok(WorkerOutcome::Success(value)) => ToolOutcome::Success(value),
            Ok(WorkerOutcome::Failure { code, message }) => ToolOutcome::Failure(
                ErrorObject::new(ErrorCode::ToolExecutionError, message)
                    .with_data(json!({ "worker_code": code })),
            ),
            Err(e) => {
                if !matches!(e, BridgeError::Stopped) {
                    warn!("Worker bridge error: {}", e);
                }
                ToolOutcome::Failure(bridge_failure(&e))
            }
        }
    }
}

fn bridge_failure(err: &BridgeError) -> ErrorObject {
    let code = match err {
        BridgeError::StartFailed(_) => ErrorCode::WorkerStartError,
        BridgeError::Crashed(_) => ErrorCode::WorkerCrashedError,
        BridgeError::Timeout(_) => ErrorCode::TimeoutError,
        BridgeError::Stopped => ErrorCode::ShuttingDown,
    };
    ErrorObject::new(code, err.to_string())
}
