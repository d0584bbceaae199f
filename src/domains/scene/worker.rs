//! Worker process loop.
//!
//! Speaks the worker wire protocol on any reader/writer pair: the
//! `scene-worker` binary runs it on stdin/stdout, tests run it over in-memory
//! pipes.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::engine::Scene;
use crate::core::worker::wire::{WorkerMessage, WorkerRequest};

/// Fault injection knobs, read from `SCENE_WORKER_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct WorkerFaults {
    /// Never answer calls to this tool.
    pub hang_on: Option<String>,

    /// Exit without answering when this tool is called.
    pub crash_on: Option<String>,

    /// Exit before reporting ready.
    pub fail_start: bool,

    /// Print a non-protocol banner line on stdout before the handshake.
    pub banner: bool,
}

impl WorkerFaults {
    pub fn from_env() -> Self {
        let flag = |key: &str| {
            std::env::var(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };
        Self {
            hang_on: std::env::var("SCENE_WORKER_HANG_ON").ok(),
            crash_on: std::env::var("SCENE_WORKER_CRASH_ON").ok(),
            fail_start: flag("SCENE_WORKER_FAIL_START"),
            banner: flag("SCENE_WORKER_BANNER"),
        }
    }
}

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// The core closed our input.
    InputClosed,
    /// `fail_start` fault.
    StartFailed,
    /// `crash_on` fault.
    Crashed,
}

impl ServeExit {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InputClosed => 0,
            Self::StartFailed => 2,
            Self::Crashed => 70,
        }
    }
}

/// Run the worker loop until input closes or a fault triggers.
pub async fn serve<R, W>(reader: R, mut writer: W, faults: &WorkerFaults) -> io::Result<ServeExit>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if faults.fail_start {
        warn!("Refusing to start (SCENE_WORKER_FAIL_START)");
        return Ok(ServeExit::StartFailed);
    }

    if faults.banner {
        write_line(&mut writer, "Scene engine (mock) starting up...").await?;
    }
    write_message(&mut writer, &WorkerMessage::ready()).await?;
    info!("Scene worker ready");

    let mut scene = Scene::new();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: WorkerRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!("Ignoring malformed request line: {}", e);
                continue;
            }
        };
        debug!(seq = request.seq, tool = %request.tool_name, "Executing");

        if faults.crash_on.as_deref() == Some(request.tool_name.as_str()) {
            warn!("Crashing on '{}' (SCENE_WORKER_CRASH_ON)", request.tool_name);
            writer.shutdown().await?;
            return Ok(ServeExit::Crashed);
        }
        if faults.hang_on.as_deref() == Some(request.tool_name.as_str()) {
            warn!("Hanging on '{}' (SCENE_WORKER_HANG_ON)", request.tool_name);
            std::future::pending::<()>().await;
        }

        let reply = match scene.execute(&request.tool_name, &request.arguments) {
            Ok(value) => WorkerMessage::success(request.seq, value),
            Err(e) => WorkerMessage::failure(request.seq, e.code(), e.to_string()),
        };
        write_message(&mut writer, &reply).await?;
    }

    info!("Input closed, scene worker exiting");
    Ok(ServeExit::InputClosed)
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &WorkerMessage) -> io::Result<()> {
    let json = serde_json::to_string(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_line(writer, &json).await
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
