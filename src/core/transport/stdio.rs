//! STDIO transport implementation.
//!
//! Newline-delimited frames on stdin, one response frame per line on stdout.
//! Requests are pipelined: every request runs as its own task and its response
//! is written when it completes, so stdout order follows completion order.

use std::collections::HashMap;
use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::TransportResult;
use crate::core::McpServer;
use crate::core::lifecycle::stop_requested;
use crate::core::protocol::{DecodeError, Inbound, JsonRpcResponse, decode_frame};

/// STDIO transport handler.
pub struct StdioTransport {
    max_frame_bytes: usize,
}

impl StdioTransport {
    /// Lines longer than `max_frame_bytes` are rejected without being buffered.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    /// Run the STDIO transport until stdin closes or the server stops.
    pub async fn run(&self, server: McpServer) -> TransportResult<()> {
        info!("Ready - communicating via stdin/stdout");
        self.serve(server, tokio::io::stdin(), tokio::io::stdout()).await?;
        info!("STDIO transport finished");
        Ok(())
    }

    /// Serve one session over arbitrary byte streams.
    pub async fn serve<R, W>(&self, server: McpServer, reader: R, writer: W) -> TransportResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut frames = FrameReader::new(reader, self.max_frame_bytes);
        let mut state = server.subscribe_state();
        let mut session = Session::new(server, writer);
        let mut reading = true;

        loop {
            tokio::select! {
                event = frames.next(), if reading => match event {
                    Ok(ReadEvent::Line(line)) => session.accept(&line).await?,
                    Ok(ReadEvent::Oversized) => {
                        warn!("Dropped frame larger than {} bytes", self.max_frame_bytes);
                        let rejected = DecodeError::new(
                            None,
                            format!("frame exceeds {} bytes", self.max_frame_bytes),
                        );
                        session.write(&rejected.into_response()).await?;
                    }
                    Ok(ReadEvent::Eof) => {
                        debug!("stdin closed; {} request(s) in flight", session.in_flight());
                        reading = false;
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        reading = false;
                    }
                },
                Some(joined) = session.tasks.join_next(), if !session.tasks.is_empty() => {
                    session.complete(joined).await?;
                }
                _ = stop_requested(&mut state), if reading => {
                    info!("Server stopping; no longer reading stdin");
                    reading = false;
                }
                else => break,
            }
        }

        Ok(())
    }
}

/// What a completed request task hands back: its session key, its sequence
/// number and the encoded response (if any).
type Completion = (String, u64, Option<String>);

/// In-flight requests of one stdio session plus the single stdout writer.
struct Session<W> {
    server: McpServer,
    writer: W,
    tasks: JoinSet<Completion>,
    in_flight: HashMap<String, (u64, AbortHandle)>,
    next_seq: u64,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    fn new(server: McpServer, writer: W) -> Self {
        Self {
            server,
            writer,
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            next_seq: 0,
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Decode one line and either answer it immediately or start its task.
    async fn accept(&mut self, line: &[u8]) -> io::Result<()> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(());
        }

        let inbound = match decode_frame(line) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Rejected frame: {}", e);
                return self.write(&e.into_response()).await;
            }
        };

        if let Inbound::Notification(note) = &inbound {
            if let Some(target) = note.cancelled_request() {
                self.cancel(&target.key());
            }
        }
        let Some(id) = inbound.id().cloned() else {
            self.server.handle_inbound(inbound).await;
            return Ok(());
        };

        let key = id.key();
        if self.in_flight.contains_key(&key) {
            warn!(%id, "Duplicate request id while the first is in flight");
            let rejected = DecodeError::new(Some(id.clone()), format!("request id {} is already in flight", id));
            return self.write(&rejected.into_response()).await;
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let server = self.server.clone();
        let task_key = key.clone();
        let handle = self.tasks.spawn(async move {
            let response = server.handle_inbound(inbound).await;
            (task_key, seq, response.map(|r| r.to_line()))
        });
        self.in_flight.insert(key, (seq, handle));
        Ok(())
    }

    /// Abort an in-flight request; it gets no response.
    fn cancel(&mut self, key: &str) {
        match self.in_flight.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                info!(id = key, "Request cancelled by client");
            }
            None => debug!(id = key, "Cancellation for a request that is not in flight"),
        }
    }

    async fn complete(&mut self, joined: Result<Completion, JoinError>) -> io::Result<()> {
        match joined {
            Ok((key, seq, response)) => {
                // A newer request may reuse the key once this one was cancelled.
                if self.in_flight.get(&key).is_some_and(|(current, _)| *current == seq) {
                    self.in_flight.remove(&key);
                }
                match response {
                    Some(line) => self.write_line(&line).await,
                    None => Ok(()),
                }
            }
            Err(e) => {
                if e.is_panic() {
                    error!("Request task panicked: {}", e);
                }
                self.in_flight.retain(|_, (_, handle)| !handle.is_finished());
                Ok(())
            }
        }
    }

    async fn write(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        self.write_line(&response.to_line()).await
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let result = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await
        }
        .await;

        if let Err(e) = &result {
            error!(
                "Failed to write to stdout: {}; abandoning {} in-flight request(s)",
                e,
                self.tasks.len()
            );
            self.tasks.abort_all();
            self.in_flight.clear();
        }
        result
    }
}

// ============================================================================
// Framing
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum ReadEvent {
    /// One line without its `\n`.
    Line(Vec<u8>),
    /// A line exceeded the limit; the rest of it is skipped.
    Oversized,
    Eof,
}

/// Splits a byte stream into lines with a size cap.
///
/// `next` keeps partial lines in `self` between calls, so dropping its future
/// (in a `select!`) never loses input.
struct FrameReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max: usize,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    fn new(reader: R, max: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            max,
            discarding: false,
        }
    }

    async fn next(&mut self) -> io::Result<ReadEvent> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                self.discarding = false;
                if self.buf.is_empty() {
                    return Ok(ReadEvent::Eof);
                }
                return Ok(ReadEvent::Line(std::mem::take(&mut self.buf)));
            }

            let (used, complete) = match available.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    if !self.discarding {
                        self.buf.extend_from_slice(&available[..pos]);
                    }
                    (pos + 1, true)
                }
                None => {
                    if !self.discarding {
                        self.buf.extend_from_slice(available);
                    }
                    (available.len(), false)
                }
            };
            self.reader.consume(used);

            if self.discarding {
                if complete {
                    self.discarding = false;
                }
                continue;
            }
            if self.buf.len() > self.max {
                self.buf.clear();
                self.discarding = !complete;
                return Ok(ReadEvent::Oversized);
            }
            if complete {
                return Ok(ReadEvent::Line(std::mem::take(&mut self.buf)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::server::tests::test_server;
    use crate::core::worker::testing::FakeLauncher;
    use serde_json::Value;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    async fn run_session(server: McpServer, input: &str, max: usize) -> Vec<Value> {
        let mut out = Vec::new();
        StdioTransport::new(max)
            .serve(server, input.as_bytes(), &mut out)
            .await
            .unwrap();
        parse_frames(&out)
    }

    fn parse_frames(out: &[u8]) -> Vec<Value> {
        String::from_utf8(out.to_vec())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn by_id<'a>(frames: &'a [Value], id: &Value) -> &'a Value {
        frames.iter().find(|f| &f["id"] == id).unwrap()
    }

    #[tokio::test]
    async fn test_frame_reader_joins_partial_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"id\":")
            .read(b"1}\r\n\n")
            .read(b"tail")
            .build();
        let mut frames = FrameReader::new(mock, 64);
        assert_eq!(frames.next().await.unwrap(), ReadEvent::Line(b"{\"id\":1}\r".to_vec()));
        assert_eq!(frames.next().await.unwrap(), ReadEvent::Line(Vec::new()));
        assert_eq!(frames.next().await.unwrap(), ReadEvent::Line(b"tail".to_vec()));
        assert_eq!(frames.next().await.unwrap(), ReadEvent::Eof);
    }

    #[tokio::test]
    async fn test_frame_reader_skips_oversized_line_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"0123456789")
            .read(b"abc\n{}\n")
            .build();
        let mut frames = FrameReader::new(mock, 8);
        assert_eq!(frames.next().await.unwrap(), ReadEvent::Oversized);
        assert_eq!(frames.next().await.unwrap(), ReadEvent::Line(b"{}".to_vec()));
        assert_eq!(frames.next().await.unwrap(), ReadEvent::Eof);
    }

    #[tokio::test]
    async fn test_mixed_frames_yield_only_response_lines() {
        let server = test_server(FakeLauncher::new());
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{}}\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "{\"id\":\"d1\",\"tool\":\"create_cube\",\"args\":{\"name\":\"Cube\"}}\r\n",
            "this is not json\n",
            "[1,2,3]\n",
        );
        let frames = run_session(server, input, 1024).await;

        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| f["jsonrpc"] == "2.0"));
        assert_eq!(by_id(&frames, &Value::from(1))["result"]["serverInfo"]["name"], "scene-mcp-server");
        assert!(
            by_id(&frames, &Value::from("d1"))["result"]
                .as_str()
                .unwrap()
                .starts_with("Created cube 'Cube'")
        );

        let rejected: Vec<_> = frames.iter().filter(|f| f["id"].is_null()).collect();
        assert_eq!(rejected.len(), 2);
        assert!(rejected.iter().all(|f| f["error"]["code"] == "TransportDecodeError"));
    }

    #[tokio::test]
    async fn test_oversized_frame_then_normal_frame() {
        let server = test_server(FakeLauncher::new());
        let input = format!(
            "{{\"id\":\"big\",\"tool\":\"create_cube\",\"args\":{{\"name\":\"{}\"}}}}\n{{\"id\":2,\"tool\":\"list_objects\"}}\n",
            "x".repeat(500)
        );
        let frames = run_session(server, &input, 128).await;

        assert_eq!(frames.len(), 2);
        assert!(frames[0]["id"].is_null());
        assert_eq!(frames[0]["error"]["code"], "TransportDecodeError");
        assert_eq!(frames[1]["id"], 2);
        assert_eq!(frames[1]["result"]["count"], 0);
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_id_is_rejected() {
        let server = test_server(FakeLauncher::new().reply_delay(Duration::from_millis(200)));
        let input = concat!(
            "{\"id\":\"a\",\"tool\":\"list_objects\"}\n",
            "{\"id\":\"a\",\"tool\":\"list_objects\"}\n",
        );
        let frames = run_session(server, input, 1024).await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["id"], "a");
        assert_eq!(frames[0]["error"]["code"], "TransportDecodeError");
        assert_eq!(frames[1]["id"], "a");
        assert_eq!(frames[1]["result"]["count"], 0);
    }

    #[tokio::test]
    async fn test_cancelled_request_gets_no_response() {
        let server = test_server(FakeLauncher::new().reply_delay(Duration::from_millis(200)));
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":\"slow\",\"method\":\"tools/call\",\"params\":{\"name\":\"list_objects\"}}\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/cancelled\",\"params\":{\"requestId\":\"slow\"}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n",
        );
        let frames = run_session(server.clone(), input, 1024).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["id"], 2);
        assert_eq!(server.health().in_flight, 0);
    }

    #[tokio::test]
    async fn test_server_stop_ends_open_session() {
        use tokio::io::AsyncWriteExt;

        let server = test_server(FakeLauncher::new());
        let (mut client, input) = tokio::io::duplex(4096);
        let session = {
            let server = server.clone();
            tokio::spawn(async move {
                let mut out = Vec::new();
                StdioTransport::new(1024)
                    .serve(server, input, &mut out)
                    .await
                    .unwrap();
                out
            })
        };

        client
            .write_all(b"{\"id\":1,\"tool\":\"list_objects\"}\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown().await;

        let out = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .unwrap()
            .unwrap();
        let frames = parse_frames(&out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["id"], 1);
    }

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_stdout_failure_ends_session() {
        let server = test_server(FakeLauncher::new());
        let input = "{\"id\":1,\"tool\":\"list_objects\"}\n";
        let result = StdioTransport::new(1024)
            .serve(server, input.as_bytes(), BrokenPipe)
            .await;
        assert!(result.is_err());
    }
}
