//! MCP Server Entry Point
//!
//! Parses the command line, loads configuration, initializes logging and then
//! either serves (the default) or stops a running instance via its pid file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use scene_mcp_server::core::control::{PidFile, StopOutcome, stop_instance};
use scene_mcp_server::core::supervisor::shutdown_signal;
use scene_mcp_server::core::{Config, McpServer, Supervisor};

/// Bound on blocking work (the stdin reader) once the server has stopped.
const RUNTIME_SHUTDOWN: Duration = Duration::from_secs(1);

/// MCP server exposing 3D scene tools backed by a supervised worker process.
#[derive(Parser, Debug)]
#[command(name = "scene-mcp-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Pid file to claim when serving, or to read when stopping
    #[arg(long, global = true, value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Command {
    /// Run the server (default)
    #[default]
    Serve,
    /// Stop the instance recorded in the pid file
    Stop,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration from environment
    let mut config = Config::from_env();
    if let Some(path) = cli.pid_file {
        config.pid_file = Some(path);
    }

    // Initialize logging
    init_logging(log_level(cli.verbose, cli.quiet, &config.logging.level));
    for warning in &config.warnings {
        warn!("{}", warning);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async {
        match cli.command.unwrap_or_default() {
            Command::Serve => serve(config).await,
            Command::Stop => stop(config).await,
        }
    });
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN);
    result
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting {} v{}", config.server.name, config.server.version);

    // Handle signals before publishing our pid.
    let shutdown = shutdown_signal();
    let _pid_file = match &config.pid_file {
        Some(path) => Some(PidFile::claim(path, stop_grace(&config)).await?),
        None => None,
    };

    // Create the MCP server
    let transport = config.transport.clone();
    let server = McpServer::new(config)?;

    info!("Server initialized");

    Supervisor::new(server, transport)
        .run_until(shutdown)
        .await?;

    info!("Server shutting down");

    Ok(())
}

async fn stop(config: Config) -> Result<()> {
    let Some(path) = config.pid_file.as_deref() else {
        bail!("No pid file configured; pass --pid-file or set MCP_PID_FILE");
    };

    match stop_instance(path, stop_grace(&config)).await? {
        StopOutcome::NotRunning => info!("No running instance recorded in {}", path.display()),
        StopOutcome::Stopped { pid, forced } => info!(pid, forced, "Stopped running instance"),
    }
    Ok(())
}

/// How long a stopping instance gets before SIGKILL: its own drain bound plus
/// time to take its worker down.
fn stop_grace(config: &Config) -> Duration {
    config.limits.drain_timeout + config.worker.terminate_grace * 2 + RUNTIME_SHUTDOWN
}

/// Pick the log level: `-q` wins, then `-v` flags, then `MCP_LOG_LEVEL`.
fn log_level(verbose: u8, quiet: bool, configured: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match configured.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        },
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialize the logging subsystem.
///
/// Logs always go to stderr; stdout belongs to the stdio transport.
fn init_logging(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}
