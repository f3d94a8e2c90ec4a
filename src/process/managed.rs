use crate::config::ServerLaunchSpec;
use crate::error::{PtError, Result};
use crate::process::adapter::{SupervisedProcess, TransportAdapter};
use crate::process::handshake::Handshake;
use crate::process::spawner::{spawn_pt, SpawnedProcess};
use crate::process::types::{FailedTransport, LiveTransport};
use async_trait::async_trait;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Timeouts used while starting and stopping the PT
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// How long the PT may take to print `SMETHODS DONE`
    pub startup_timeout: Duration,
    /// How long to wait after closing the PT's stdin
    pub stdin_close_grace: Duration,
    /// How long to wait after SIGTERM before sending SIGKILL
    pub stop_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            stdin_close_grace: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Runs a real PT executable using the managed transport environment and its
/// stdout readiness lines
#[derive(Debug, Clone, Default)]
pub struct ManagedTransportAdapter {
    config: AdapterConfig,
}

impl ManagedTransportAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }
}

#[async_trait]
impl TransportAdapter for ManagedTransportAdapter {
    type Process = ManagedProcess;

    async fn start(&self, spec: &ServerLaunchSpec) -> Result<ManagedProcess> {
        let SpawnedProcess { mut child, pid } = spawn_pt(spec)?;
        info!("PT executable started (pid {})", pid);

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            PtError::SpawnError(format!("PT (pid {}) has no stdout pipe", pid))
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(BufReader::new(stderr), pid, "stderr"));
        }

        let mut stdout = BufReader::new(stdout);
        let mut handshake = Handshake::new(spec.transport_names());

        let timeout = self.config.startup_timeout;
        let result =
            match tokio::time::timeout(timeout, read_handshake(&mut stdout, &mut handshake)).await {
                Ok(result) => result,
                Err(_) => Err(PtError::StartupTimeout(timeout)),
            };

        if let Err(e) = result {
            warn!("PT (pid {}) failed to start, killing it: {}", pid, e);
            if let Err(kill_err) = child.kill().await {
                warn!("Failed to kill PT (pid {}): {}", pid, kill_err);
            }
            return Err(e);
        }

        for name in handshake.ignored() {
            warn!("PT ignored transport '{}'", name);
        }

        tokio::spawn(forward_output(stdout, pid, "stdout"));

        let (live, failed) = handshake.into_parts();
        Ok(ManagedProcess {
            child,
            pid,
            stdin,
            live,
            failed,
            config: self.config.clone(),
            exit_status: None,
        })
    }
}

/// Read stdout until the PT reports `SMETHODS DONE`
async fn read_handshake(
    stdout: &mut BufReader<ChildStdout>,
    handshake: &mut Handshake,
) -> Result<()> {
    loop {
        let line = read_line_lossy(stdout)
            .await
            .map_err(|e| PtError::HandshakeError(format!("Failed to read PT stdout: {}", e)))?;

        match line {
            Some(line) => {
                if handshake.handle_line(&line)? {
                    return Ok(());
                }
            }
            None => {
                return Err(PtError::HandshakeError(
                    "PT closed stdout before SMETHODS DONE".to_string(),
                ))
            }
        }
    }
}

/// Read one line, replacing invalid UTF-8 instead of failing
///
/// Returns `Ok(None)` at end of stream. The trailing `\n` (and `\r`) is
/// stripped.
async fn read_line_lossy<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Forward PT output to the log until the stream closes
///
/// The pipe stays open for as long as the PT writes to it; a PT writing to a
/// closed pipe would die of SIGPIPE.
async fn forward_output<R>(mut reader: R, pid: u32, stream: &'static str)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_line_lossy(&mut reader).await {
            Ok(Some(line)) => debug!("PT {} (pid {}): {}", stream, pid, line),
            Ok(None) => return,
            Err(e) => {
                warn!(
                    "Failed to read PT {} (pid {}), discarding further output: {}",
                    stream, pid, e
                );
                break;
            }
        }
    }

    if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
        debug!("PT {} (pid {}) closed with error: {}", stream, pid, e);
    }
}

/// A running PT started by [`ManagedTransportAdapter`]
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    pid: u32,
    /// Held open for the life of the PT; dropping it asks the PT to exit
    stdin: Option<ChildStdin>,
    live: Vec<LiveTransport>,
    failed: Vec<FailedTransport>,
    config: AdapterConfig,
    exit_status: Option<ExitStatus>,
}

impl ManagedProcess {
    /// Whether the PT has exited, reaping it if so
    fn has_exited(&mut self) -> Result<bool> {
        if self.exit_status.is_some() {
            return Ok(true);
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(PtError::StopError(self.pid, format!("try_wait failed: {}", e))),
        }
    }

    /// Wait up to `timeout` for the PT to exit
    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit_status = Some(status);
                Ok(Some(status))
            }
            Ok(Err(e)) => Err(PtError::StopError(self.pid, format!("Wait failed: {}", e))),
            Err(_) => Ok(None),
        }
    }

    #[cfg(unix)]
    fn send_terminate(&self) -> Result<()> {
        match signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(PtError::StopError(
                self.pid,
                format!("Failed to send SIGTERM: {}", e),
            )),
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) -> Result<()> {
        self.child
            .start_kill()
            .map_err(|e| PtError::StopError(self.pid, format!("Failed to kill: {}", e)))
    }
}

#[async_trait]
impl SupervisedProcess for ManagedProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn live_transports(&self) -> &[LiveTransport] {
        &self.live
    }

    fn failed_transports(&self) -> &[FailedTransport] {
        &self.failed
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }

        let status = self.child.wait().await.map_err(|e| {
            PtError::RuntimeFailure(format!("Waiting for PT (pid {}) failed: {}", self.pid, e))
        })?;
        self.exit_status = Some(status);

        Ok(status)
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.has_exited()? {
            debug!("PT (pid {}) already exited, nothing to terminate", self.pid);
            self.stdin = None;
            return Ok(());
        }

        if let Some(stdin) = self.stdin.take() {
            debug!("Closing stdin of PT (pid {})", self.pid);
            drop(stdin);

            if let Some(status) = self.wait_for_exit(self.config.stdin_close_grace).await? {
                info!("PT (pid {}) exited after stdin closed: {}", self.pid, status);
                return Ok(());
            }
        }

        debug!(
            "PT (pid {}) still running, sending SIGTERM and waiting {:?}",
            self.pid, self.config.stop_timeout
        );
        self.send_terminate()?;

        if let Some(status) = self.wait_for_exit(self.config.stop_timeout).await? {
            info!("PT (pid {}) terminated: {}", self.pid, status);
            return Ok(());
        }

        warn!(
            "PT (pid {}) did not exit within {:?}, sending SIGKILL",
            self.pid, self.config.stop_timeout
        );
        self.child.kill().await.map_err(|e| {
            PtError::StopError(self.pid, format!("Failed to send SIGKILL: {}", e))
        })?;
        self.exit_status = self.child.try_wait().ok().flatten();
        info!("PT (pid {}) killed", self.pid);

        Ok(())
    }
}
