//! Configuration management for the MCP server.
//!
//! Everything comes from `MCP_*` environment variables (optionally via a
//! `.env` file), layered over defaults. A value that fails to parse keeps its
//! default and is reported in [`Config::warnings`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::transport::{TransportConfig, TransportMode};

/// Main configuration structure for the MCP server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Transport configuration.
    pub transport: TransportConfig,

    /// Worker process and supervision settings.
    pub worker: WorkerConfig,

    /// Per-call timeout and shutdown bounds.
    pub limits: LimitsConfig,

    /// Where the running server records its pid.
    pub pid_file: Option<PathBuf>,

    /// Problems found while loading; logged once logging is up.
    pub warnings: Vec<String>,
}

/// Server identification configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,
}

/// How to run and supervise the worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub startup_timeout: Duration,
    pub terminate_grace: Duration,
    pub restart_window: Duration,
    pub restart_cooldown: Duration,
    pub max_start_failures: u32,
    pub queue_depth: usize,
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Upper bound for one tool call, queueing included.
    pub timeout: Duration,

    /// How long a stop waits for in-flight requests.
    pub drain_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "scene-mcp-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            transport: TransportConfig::default(),
            worker: WorkerConfig::default(),
            limits: LimitsConfig::default(),
            pid_file: None,
            warnings: Vec::new(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            args: Vec::new(),
            startup_timeout: Duration::from_secs(10),
            terminate_grace: Duration::from_secs(2),
            restart_window: Duration::from_secs(60),
            restart_cooldown: Duration::from_secs(5),
            max_start_failures: 3,
            queue_depth: 64,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// `scene-worker` next to our own executable, else whatever is on `PATH`.
fn default_worker_command() -> PathBuf {
    let name = format!("scene-worker{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(name))
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables are expected to be prefixed with `MCP_`.
    /// For example: `MCP_SERVER_NAME`, `MCP_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader {
            lookup,
            warnings: Vec::new(),
        };
        let mut config = Self::default();

        if let Some(name) = env.string("MCP_SERVER_NAME") {
            config.server.name = name;
        }
        if let Some(level) = env.string("MCP_LOG_LEVEL") {
            config.logging.level = level;
        }

        // Transport
        let transport = &mut config.transport;
        if let Some(raw) = env.string("MCP_TRANSPORT") {
            match TransportMode::parse(&raw) {
                Some(mode) => transport.mode = mode,
                None => env.invalid("MCP_TRANSPORT", &raw, "expected stdio, http or both"),
            }
        }
        if let Some(host) = env.string("MCP_HTTP_HOST") {
            transport.http.host = host;
        }
        if let Some(port) = env
            .parsed::<u16>("MCP_HTTP_PORT")
            .or_else(|| env.parsed::<u16>("MCP_PORT"))
        {
            transport.http.port = port;
        }
        if let Some(path) = env.string("MCP_HTTP_PATH") {
            if path.starts_with('/') {
                transport.http.rpc_path = path;
            } else {
                env.invalid("MCP_HTTP_PATH", &path, "must start with '/'");
            }
        }
        if let Some(cors) = env.flag("MCP_HTTP_CORS") {
            transport.http.enable_cors = cors;
        }
        if let Some(max) = env.parsed::<usize>("MCP_MAX_FRAME_BYTES") {
            transport.max_frame_bytes = max.max(1024);
        }

        // Limits
        if let Some(timeout) = env.millis("MCP_TIMEOUT_MS") {
            config.limits.timeout = timeout;
        }
        if let Some(drain) = env.millis("MCP_DRAIN_TIMEOUT_MS") {
            config.limits.drain_timeout = drain;
        }

        // Worker
        let worker = &mut config.worker;
        if let Some(command) = env.string("MCP_WORKER_COMMAND") {
            worker.command = PathBuf::from(command);
        }
        if let Some(args) = env.string("MCP_WORKER_ARGS") {
            worker.args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(d) = env.millis("MCP_WORKER_STARTUP_TIMEOUT_MS") {
            worker.startup_timeout = d;
        }
        if let Some(d) = env.millis("MCP_WORKER_TERMINATE_GRACE_MS") {
            worker.terminate_grace = d;
        }
        if let Some(d) = env.millis("MCP_WORKER_RESTART_WINDOW_MS") {
            worker.restart_window = d;
        }
        if let Some(d) = env.millis("MCP_WORKER_RESTART_COOLDOWN_MS") {
            worker.restart_cooldown = d;
        }
        if let Some(depth) = env.parsed::<usize>("MCP_WORKER_QUEUE_DEPTH") {
            if depth == 0 {
                env.invalid("MCP_WORKER_QUEUE_DEPTH", "0", "must be at least 1");
            } else {
                worker.queue_depth = depth;
            }
        }

        if let Some(path) = env.string("MCP_PID_FILE") {
            config.pid_file = Some(PathBuf::from(path));
        }

        config.warnings = env.warnings;
        config
    }
}

struct EnvReader<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty, trimmed value.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&mut self, key: &str) -> Option<T> {
        let raw = self.string(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.invalid(key, &raw, "not a valid number");
                None
            }
        }
    }

    fn millis(&mut self, key: &str) -> Option<Duration> {
        match self.parsed::<u64>(key)? {
            0 => {
                self.invalid(key, "0", "must be greater than zero");
                None
            }
            ms => Some(Duration::from_millis(ms)),
        }
    }

    fn flag(&mut self, key: &str) -> Option<bool> {
        let raw = self.string(key)?;
        match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                self.invalid(key, &raw, "expected true or false");
                None
            }
        }
    }

    fn invalid(&mut self, key: &str, raw: &str, reason: &str) {
        self.warnings.push(format!(
            "Ignoring {}={:?} ({}); keeping the default",
            key, raw, reason
        ));
    }
}
