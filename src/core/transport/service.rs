//! Transport service - runs the configured adapters against one server.

use tracing::info;

use super::{TransportConfig, TransportMode, TransportResult};
use crate::core::McpServer;

#[cfg(not(all(feature = "stdio", feature = "http")))]
use super::TransportError;

#[cfg(feature = "stdio")]
use super::stdio::StdioTransport;

#[cfg(feature = "http")]
use super::http::HttpTransport;

/// Transport service - manages the transport layer for the MCP server.
pub struct TransportService {
    config: TransportConfig,
}

impl TransportService {
    /// Create a new transport service with the given configuration.
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Log information about the configured transport.
    pub fn log_info(&self) {
        info!("Starting transport: {}", self.config.description());
    }

    /// Run the configured adapters until they finish.
    ///
    /// stdio finishes on EOF or when the server stops; HTTP only when the
    /// server stops. In `Both` mode an EOF on stdin leaves HTTP running, and
    /// the first adapter error ends both.
    pub async fn run(self, server: McpServer) -> TransportResult<()> {
        self.log_info();

        match self.config.mode {
            TransportMode::Stdio => self.run_stdio(server).await,
            TransportMode::Http => self.run_http(server).await,
            TransportMode::Both => {
                tokio::try_join!(self.run_stdio(server.clone()), self.run_http(server))?;
                Ok(())
            }
        }
    }

    #[cfg(feature = "stdio")]
    async fn run_stdio(&self, server: McpServer) -> TransportResult<()> {
        StdioTransport::new(self.config.max_frame_bytes)
            .run(server)
            .await
    }

    #[cfg(not(feature = "stdio"))]
    async fn run_stdio(&self, _server: McpServer) -> TransportResult<()> {
        Err(TransportError::Unavailable("stdio"))
    }

    #[cfg(feature = "http")]
    async fn run_http(&self, server: McpServer) -> TransportResult<()> {
        HttpTransport::new(self.config.http.clone(), self.config.max_frame_bytes)
            .run(server)
            .await
    }

    #[cfg(not(feature = "http"))]
    async fn run_http(&self, _server: McpServer) -> TransportResult<()> {
        Err(TransportError::Unavailable("http"))
    }
}

#[cfg(all(test, feature = "http"))]
mod tests {
    use super::*;
    use crate::core::server::tests::test_server;
    use crate::core::transport::TransportError;
    use crate::core::worker::testing::FakeLauncher;
    use std::time::Duration;

    #[tokio::test]
    async fn test_http_bind_failure_is_reported() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let server = test_server(FakeLauncher::new());
        let service = TransportService::new(TransportConfig::http(port, "127.0.0.1"));
        let result = tokio::time::timeout(Duration::from_secs(2), service.run(server))
            .await
            .unwrap();
        assert!(matches!(result, Err(TransportError::BindError { .. })));
    }
}
