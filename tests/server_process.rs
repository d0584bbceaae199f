//! Drives the `scene-mcp-server` binary as a client would.

use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const SERVER: &str = env!("CARGO_BIN_EXE_scene-mcp-server");
const WORKER: &str = env!("CARGO_BIN_EXE_scene-worker");

fn server_command() -> Command {
    let mut cmd = Command::new(SERVER);
    cmd.env("MCP_WORKER_COMMAND", WORKER)
        .env("MCP_LOG_LEVEL", "debug")
        .env("SCENE_WORKER_BANNER", "1")
        .env_remove("MCP_PID_FILE")
        .kill_on_drop(true);
    cmd
}

#[tokio::test]
async fn test_stdio_session_writes_only_protocol_frames() {
    let mut child = server_command()
        .env("MCP_TRANSPORT", "stdio")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let input = concat!(
        "{\"jsonrpc\":\"2.0\",\"id\":0,\"method\":\"initialize\",\"params\":{}}\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
        "{\"id\":\"1\",\"tool\":\"create_cube\",\"args\":{\"name\":\"Cube\",\"location\":[0,0,0],\"size\":2.0}}\n",
        "{\"id\":\"2\",\"tool\":\"create_cone\",\"args\":{}}\n",
        "not json at all\n",
        "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"tools/call\",\"params\":{\"name\":\"list_objects\"}}\n",
    );
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(input.as_bytes()).await.unwrap();
    drop(stdin);

    let output = tokio::time::timeout(Duration::from_secs(20), child.wait_with_output())
        .await
        .unwrap()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let frames: Vec<Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(frames.len(), 5);
    assert!(frames.iter().all(|f| f["jsonrpc"] == "2.0"));

    let by_id = |id: Value| frames.iter().find(|f| f["id"] == id).unwrap();
    assert_eq!(by_id(Value::from(0))["result"]["serverInfo"]["name"], "scene-mcp-server");
    assert_eq!(
        by_id(Value::from("1"))["result"],
        "Created cube 'Cube' at [0, 0, 0] with size 2"
    );
    assert_eq!(by_id(Value::from("2"))["error"]["code"], "UnknownTool");
    assert_eq!(by_id(Value::Null)["error"]["code"], "TransportDecodeError");
    assert_eq!(by_id(Value::from(3))["result"]["isError"], false);

    // Diagnostics (including the worker banner) stay on stderr.
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Server stopped"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_command_ends_running_server() {
    let dir = tempfile::TempDir::new().unwrap();
    let pid_file = dir.path().join("scene.pid");

    let mut serving = server_command()
        .env("MCP_TRANSPORT", "http")
        .env("MCP_HTTP_PORT", "0")
        .arg("--pid-file")
        .arg(&pid_file)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let recorded = loop {
        let pid = std::fs::read_to_string(&pid_file)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok());
        if let Some(pid) = pid {
            break pid;
        }
        assert!(tokio::time::Instant::now() < deadline, "pid file never appeared");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    assert_eq!(Some(recorded), serving.id());

    // Reap the server as soon as it exits so `stop` does not see a zombie.
    let serving = tokio::spawn(async move { serving.wait().await });

    let stop = server_command()
        .arg("stop")
        .arg("--pid-file")
        .arg(&pid_file)
        .status()
        .await
        .unwrap();
    assert!(stop.success());

    let status = tokio::time::timeout(Duration::from_secs(10), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(status.success());
    assert!(!pid_file.exists());

    // Nothing left to stop.
    let again = server_command()
        .arg("stop")
        .arg("--pid-file")
        .arg(&pid_file)
        .status()
        .await
        .unwrap();
    assert!(again.success());
}
