// Integration tests for the PT stop sequence: stdin close, SIGTERM, SIGKILL
#![cfg(unix)]

use nix::sys::signal::kill;
use nix::unistd::Pid;
use ptserver::config::{ServerLaunchSpec, TransportLaunchSpec};
use ptserver::process::{
    AdapterConfig, LifecycleSupervisor, ManagedTransportAdapter, SupervisedProcess,
    SupervisorState, TransportAdapter,
};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const HANDSHAKE: &str = r#"
echo "VERSION 1"
echo "SMETHOD obfs4 127.0.0.1:1234"
echo "SMETHODS DONE"
"#;

fn create_spec(dir: &TempDir, tail: &str) -> ServerLaunchSpec {
    let script = dir.path().join("fake-pt.sh");
    fs::write(&script, format!("{}{}\n", HANDSHAKE, tail)).unwrap();

    ServerLaunchSpec {
        executable: PathBuf::from("/bin/sh"),
        executable_args: vec![script.to_string_lossy().into_owned()],
        state_directory: dir.path().to_path_buf(),
        forward_target: "127.0.0.1:9001".to_string(),
        transports: vec![TransportLaunchSpec::new("obfs4", "127.0.0.1:1234")],
    }
}

fn create_adapter(stdin_close_grace: Duration, stop_timeout: Duration) -> ManagedTransportAdapter {
    ManagedTransportAdapter::new(AdapterConfig {
        startup_timeout: Duration::from_secs(5),
        stdin_close_grace,
        stop_timeout,
    })
}

fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[tokio::test]
async fn test_stop_by_closing_stdin() {
    let temp_dir = TempDir::new().unwrap();
    let spec = create_spec(&temp_dir, "read line\nexit 0");
    let adapter = create_adapter(Duration::from_secs(5), Duration::from_secs(5));

    let mut process = adapter.start(&spec).await.unwrap();
    let pid = process.pid().unwrap();
    assert!(is_alive(pid));

    let start = Instant::now();
    process.terminate().await.unwrap();

    // Exited on stdin close, well before the grace period ran out
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(!is_alive(pid));
    assert!(process.wait().await.unwrap().success());
}

#[tokio::test]
async fn test_stop_by_sigterm() {
    let temp_dir = TempDir::new().unwrap();
    let marker = temp_dir.path().join("term.txt");
    let spec = create_spec(
        &temp_dir,
        r#"trap 'echo term > "$TOR_PT_STATE_LOCATION/term.txt"; exit 0' TERM
while true; do sleep 0.1; done"#,
    );
    let adapter = create_adapter(Duration::from_millis(300), Duration::from_secs(5));

    let mut process = adapter.start(&spec).await.unwrap();
    let pid = process.pid().unwrap();

    let start = Instant::now();
    process.terminate().await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(start.elapsed() < Duration::from_secs(4));
    assert!(!is_alive(pid));
    assert_eq!(fs::read_to_string(&marker).unwrap().trim(), "term");
}

#[tokio::test]
async fn test_stop_escalates_to_sigkill() {
    let temp_dir = TempDir::new().unwrap();
    let spec = create_spec(&temp_dir, "trap '' TERM\nexec /bin/sleep 30");
    let adapter = create_adapter(Duration::from_millis(200), Duration::from_millis(300));

    let mut process = adapter.start(&spec).await.unwrap();
    let pid = process.pid().unwrap();

    let start = Instant::now();
    process.terminate().await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(500));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!is_alive(pid));
}

#[tokio::test]
async fn test_terminate_after_exit_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let spec = create_spec(&temp_dir, "exit 0");
    let adapter = create_adapter(Duration::from_secs(5), Duration::from_secs(5));

    let mut process = adapter.start(&spec).await.unwrap();
    let status = process.wait().await.unwrap();
    assert!(status.success());

    let start = Instant::now();
    process.terminate().await.unwrap();
    process.terminate().await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_supervisor_terminate_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let spec = create_spec(&temp_dir, "read line\nexit 0");
    let mut supervisor =
        LifecycleSupervisor::new(create_adapter(Duration::from_secs(5), Duration::from_secs(5)));

    supervisor.start(&spec).await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Running);

    supervisor.terminate().await.unwrap();
    supervisor.terminate().await.unwrap();
    supervisor.terminate().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Terminated);
}
