//! Transport configuration types.

use serde::{Deserialize, Serialize};

/// Which adapters to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Standard input/output (default for MCP).
    Stdio,
    /// JSON-RPC over HTTP POST.
    Http,
    /// Both adapters sharing one server.
    Both,
}

impl TransportMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "stdio" => Some(Self::Stdio),
            "http" => Some(Self::Http),
            "both" | "stdio+http" => Some(Self::Both),
            _ => None,
        }
    }

    pub fn uses_stdio(&self) -> bool {
        matches!(self, Self::Stdio | Self::Both)
    }

    pub fn uses_http(&self) -> bool {
        matches!(self, Self::Http | Self::Both)
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Port number to listen on.
    pub port: u16,

    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Path for JSON-RPC endpoint.
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,

    /// Enable CORS for browser clients.
    #[serde(default = "default_cors")]
    pub enable_cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_path() -> String {
    "/mcp".to_string()
}

fn default_cors() -> bool {
    true
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: default_host(),
            rpc_path: default_rpc_path(),
            enable_cors: default_cors(),
        }
    }
}

impl HttpConfig {
    /// Get the bind address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Transport configuration options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub mode: TransportMode,
    pub http: HttpConfig,
    /// Largest accepted frame (stdio line or HTTP body), in bytes.
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Stdio,
            http: HttpConfig::default(),
            max_frame_bytes: 1024 * 1024,
        }
    }
}

impl TransportConfig {
    /// Create a STDIO transport config.
    pub fn stdio() -> Self {
        Self::default()
    }

    /// Create an HTTP transport config.
    pub fn http(port: u16, host: impl Into<String>) -> Self {
        Self {
            mode: TransportMode::Http,
            http: HttpConfig {
                port,
                host: host.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Get a description of this transport for logging.
    pub fn description(&self) -> String {
        let http = format!(
            "HTTP on {}:{}{}",
            self.http.host, self.http.port, self.http.rpc_path
        );
        match self.mode {
            TransportMode::Stdio => "STDIO (standard MCP mode)".to_string(),
            TransportMode::Http => http,
            TransportMode::Both => format!("STDIO + {}", http),
        }
    }

    /// Check if this transport is the standard STDIO mode.
    pub fn is_stdio(&self) -> bool {
        self.mode == TransportMode::Stdio
    }
}
