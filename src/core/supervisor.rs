//! Process-level lifecycle: run the transports, react to termination signals,
//! and make sure the server (and with it the worker) is stopped on every exit
//! path.

use std::future::Future;

use tracing::{info, warn};

use super::McpServer;
use super::error::Result;
use super::transport::{TransportConfig, TransportService};

/// Owns the server for the lifetime of the process.
pub struct Supervisor {
    server: McpServer,
    transport: TransportService,
}

impl Supervisor {
    pub fn new(server: McpServer, transport: TransportConfig) -> Self {
        Self {
            server,
            transport: TransportService::new(transport),
        }
    }

    pub fn server(&self) -> &McpServer {
        &self.server
    }

    /// Run until SIGINT/SIGTERM (Ctrl+C off unix) or until the transports end.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves or the transports end, then stop the
    /// server. Returns the transport error, if any, after stopping.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self { server, transport } = self;

        let transport = transport.run(server.clone());
        tokio::pin!(transport);
        tokio::pin!(shutdown);

        let result = tokio::select! {
            result = &mut transport => {
                match &result {
                    Ok(()) => info!("Transport finished; stopping server"),
                    Err(e) => warn!("Transport failed: {}; stopping server", e),
                }
                server.shutdown().await;
                result
            }
            _ = &mut shutdown => {
                info!("Shutdown requested; stopping server");
                let ((), result) = tokio::join!(server.shutdown(), &mut transport);
                result
            }
        };

        result.map_err(Into::into)
    }
}

/// Resolves on the first termination signal.
///
/// Handlers are installed when this is called, not when the future is first
/// polled, so signals arriving in between are not lost.
#[cfg(unix)]
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(int), Ok(term)) => Some((int, term)),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers: {}; falling back to Ctrl+C", e);
            None
        }
    };

    async move {
        match handlers {
            Some((mut sigint, mut sigterm)) => tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            },
            None => ctrl_c().await,
        }
    }
}

/// Resolves on the first termination signal.
#[cfg(not(unix))]
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    ctrl_c()
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(all(test, feature = "http"))]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::core::lifecycle::ServerState;
    use crate::core::protocol::ToolRequest;
    use crate::core::server::tests::test_server;
    use crate::core::worker::WorkerState;
    use crate::core::worker::testing::FakeLauncher;
    use serde_json::Value;
    use std::time::Duration;

    fn http_on_free_port() -> TransportConfig {
        TransportConfig::http(0, "127.0.0.1")
    }

    #[tokio::test]
    async fn test_shutdown_request_stops_server_and_worker() {
        let server = test_server(FakeLauncher::new());
        let supervisor = Supervisor::new(server.clone(), http_on_free_port());

        let client = server.clone();
        let result = supervisor
            .run_until(async move {
                let resp = client
                    .submit(ToolRequest::new(1, "list_objects", Value::Null))
                    .await;
                assert!(resp.outcome.is_success());
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.worker_status().state, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_transport_failure_still_stops_server() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let server = test_server(FakeLauncher::new());
        let supervisor = Supervisor::new(server.clone(), TransportConfig::http(port, "127.0.0.1"));
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            supervisor.run_until(std::future::pending()),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
