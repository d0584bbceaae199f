//! In-memory worker for tests.
//!
//! Runs the scene engine on a task behind `tokio::io::duplex` pipes and records
//! what it was asked to do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};

use super::error::BridgeError;
use super::launcher::{WorkerConnection, WorkerLauncher};
use super::wire::{WorkerMessage, WorkerRequest};
use crate::domains::scene::Scene;

#[derive(Debug, Clone, Default)]
struct FakeBehavior {
    hang_on: Option<String>,
    crash_on: Option<String>,
    failing_starts: usize,
    reply_delay: Duration,
    noisy: bool,
    late_replies: bool,
}

/// Counters shared between a [`FakeLauncher`] and the test.
#[derive(Debug, Default)]
pub(crate) struct FakeStats {
    launches: AtomicUsize,
    active: AtomicUsize,
    overlaps: AtomicUsize,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeStats {
    pub(crate) fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Requests received while another was still executing.
    pub(crate) fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Tool names in the order the worker received them.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(tool, _)| tool.clone()).collect()
    }

    /// The `name` argument of each received call that carried one, in order.
    pub(crate) fn targets(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, target)| target.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeLauncher {
    behavior: FakeBehavior,
    stats: Arc<FakeStats>,
}

impl FakeLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Never answer this tool.
    pub(crate) fn hang_on(mut self, tool: &str) -> Self {
        self.behavior.hang_on = Some(tool.to_string());
        self
    }

    /// Close the output without answering this tool.
    pub(crate) fn crash_on(mut self, tool: &str) -> Self {
        self.behavior.crash_on = Some(tool.to_string());
        self
    }

    /// The first `n` launches exit before the ready handshake.
    pub(crate) fn failing_starts(mut self, n: usize) -> Self {
        self.behavior.failing_starts = n;
        self
    }

    pub(crate) fn reply_delay(mut self, delay: Duration) -> Self {
        self.behavior.reply_delay = delay;
        self
    }

    /// Print non-protocol lines before the handshake and each reply.
    pub(crate) fn noisy(mut self) -> Self {
        self.behavior.noisy = true;
        self
    }

    /// Send a reply with a stale seq before each real one.
    pub(crate) fn late_replies(mut self) -> Self {
        self.behavior.late_replies = true;
        self
    }

    pub(crate) fn stats(&self) -> Arc<FakeStats> {
        Arc::clone(&self.stats)
    }

    pub(crate) fn into_arc(self) -> Arc<dyn WorkerLauncher> {
        Arc::new(self)
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self) -> Result<WorkerConnection, BridgeError> {
        let n = self.stats.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let (core, worker) = tokio::io::duplex(64 * 1024);

        let fail_start = n <= self.behavior.failing_starts;
        tokio::spawn(run_fake(
            worker,
            self.behavior.clone(),
            Arc::clone(&self.stats),
            fail_start,
        ));

        let (reader, writer) = tokio::io::split(core);
        Ok(WorkerConnection {
            pid: None,
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        })
    }

    fn describe(&self) -> String {
        "fake worker".to_string()
    }
}

type SharedWriter = Arc<tokio::sync::Mutex<WriteHalf<DuplexStream>>>;

async fn run_fake(stream: DuplexStream, behavior: FakeBehavior, stats: Arc<FakeStats>, fail_start: bool) {
    if fail_start {
        return;
    }

    let (reader, writer) = tokio::io::split(stream);
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));
    if behavior.noisy {
        write_raw(&writer, "Fake engine 1.0 booting").await;
    }
    write_message(&writer, &WorkerMessage::ready()).await;

    let scene = Arc::new(Mutex::new(Scene::new()));
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = serde_json::from_str::<WorkerRequest>(&line) else {
            continue;
        };
        let target = request
            .arguments
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        stats
            .calls
            .lock()
            .unwrap()
            .push((request.tool_name.clone(), target));
        if stats.active.fetch_add(1, Ordering::SeqCst) > 0 {
            stats.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        if behavior.crash_on.as_deref() == Some(request.tool_name.as_str()) {
            stats.active.fetch_sub(1, Ordering::SeqCst);
            let _ = writer.lock().await.shutdown().await;
            return;
        }
        if behavior.hang_on.as_deref() == Some(request.tool_name.as_str()) {
            // Stays silent; the core kills this instance.
            stats.active.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        // Replies go out from a separate task so a misbehaving core that
        // pipelines requests shows up as an overlap.
        let writer = Arc::clone(&writer);
        let scene = Arc::clone(&scene);
        let stats = Arc::clone(&stats);
        let behavior = behavior.clone();
        tokio::spawn(async move {
            tokio::time::sleep(behavior.reply_delay).await;
            let reply = {
                let mut scene = scene.lock().unwrap();
                match scene.execute(&request.tool_name, &request.arguments) {
                    Ok(value) => WorkerMessage::success(request.seq, value),
                    Err(e) => WorkerMessage::failure(request.seq, e.code(), e.to_string()),
                }
            };
            stats.active.fetch_sub(1, Ordering::SeqCst);

            if behavior.noisy {
                write_raw(&writer, "engine: frame done").await;
            }
            if behavior.late_replies {
                let stale = WorkerMessage::success(request.seq.saturating_sub(1), "stale".into());
                write_message(&writer, &stale).await;
            }
            write_message(&writer, &reply).await;
        });
    }
}

async fn write_message(writer: &SharedWriter, msg: &WorkerMessage) {
    if let Ok(line) = serde_json::to_string(msg) {
        write_raw(writer, &line).await;
    }
}

async fn write_raw(writer: &SharedWriter, line: &str) {
    let mut w = writer.lock().await;
    let _ = write_line(&mut *w, line).await;
}

async fn write_line<W: AsyncWrite + Unpin>(w: &mut W, line: &str) -> std::io::Result<()> {
    w.write_all(line.as_bytes()).await?;
    w.write_all(b"\n").await?;
    w.flush().await
}
