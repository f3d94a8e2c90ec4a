use crate::config::ServerLaunchSpec;
use crate::error::{PtError, Result};
use crate::process::adapter::{SupervisedProcess, TransportAdapter};
use crate::process::types::{LiveTransport, RunOutcome, SupervisorState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Owns one PT subprocess from launch until it is terminated
///
/// The supervisor is the only owner of the process handle. `terminate` takes
/// the handle out, so the adapter sees at most one termination request no
/// matter how often `terminate` is called. If the supervisor is dropped while
/// a handle is still held, dropping the handle kills the subprocess.
pub struct LifecycleSupervisor<A: TransportAdapter> {
    adapter: A,
    state: SupervisorState,
    process: Option<A::Process>,
    live_transports: Vec<LiveTransport>,
}

impl<A: TransportAdapter> LifecycleSupervisor<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            state: SupervisorState::Idle,
            process: None,
            live_transports: Vec::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Transports the PT reported as bound when it became ready
    pub fn live_transports(&self) -> &[LiveTransport] {
        &self.live_transports
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Start the PT and wait for it to report readiness
    ///
    /// # Returns
    /// * `Ok(())` - The PT is running
    /// * `Err(PtError)` - The PT could not be started; nothing is left running
    pub async fn start(&mut self, spec: &ServerLaunchSpec) -> Result<()> {
        if self.state != SupervisorState::Idle {
            return Err(PtError::InvalidState(format!(
                "cannot start a PT while the supervisor is {}",
                self.state
            )));
        }

        self.state = SupervisorState::Starting;
        info!(
            "Starting PT executable {} with {} transport(s)",
            spec.executable.display(),
            spec.transports.len()
        );

        let process = match self.adapter.start(spec).await {
            Ok(process) => process,
            Err(e) => {
                error!("Failed to start PT: {}", e);
                self.state = SupervisorState::Terminated;
                return Err(e);
            }
        };

        self.live_transports = process.live_transports().to_vec();
        for transport in &self.live_transports {
            info!(
                "Transport '{}' available on {}",
                transport.name, transport.address
            );
        }
        for failed in process.failed_transports() {
            warn!("Transport '{}' failed: {}", failed.name, failed.message);
        }
        if self.live_transports.is_empty() {
            warn!("PT did not activate any of the requested transports");
        }
        debug!("Available transports: {:?}", self.live_transports);

        self.process = Some(process);
        self.state = SupervisorState::Running;

        Ok(())
    }

    /// Block until the PT exits or shutdown is requested
    ///
    /// # Returns
    /// * `Ok(RunOutcome::ProcessExited)` - The PT exited on its own
    /// * `Ok(RunOutcome::ShutdownRequested)` - `shutdown` was cancelled
    /// * `Err(PtError::RuntimeFailure)` - Waiting on the PT failed
    pub async fn wait(&mut self, shutdown: &CancellationToken) -> Result<RunOutcome> {
        let process = self.process.as_mut().ok_or_else(|| {
            PtError::InvalidState(format!("no running PT to wait for ({})", self.state))
        })?;

        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Ok(RunOutcome::ShutdownRequested),
            status = process.wait() => status.map(RunOutcome::ProcessExited),
        };

        self.state = SupervisorState::Stopping;
        outcome
    }

    /// Stop the PT
    ///
    /// Safe to call any number of times; only the first call reaches the
    /// adapter.
    pub async fn terminate(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            debug!("No PT to terminate");
            if self.state != SupervisorState::Idle {
                self.state = SupervisorState::Terminated;
            }
            return Ok(());
        };

        self.state = SupervisorState::Stopping;
        let result = process.terminate().await;
        self.state = SupervisorState::Terminated;

        result
    }

    /// Start the PT, wait for it, and terminate it on every exit path
    ///
    /// Start failures are returned as-is since nothing is running. Once the
    /// PT is running, termination always happens before this returns; a
    /// runtime failure is reported after the PT has been stopped.
    pub async fn run(
        &mut self,
        spec: &ServerLaunchSpec,
        shutdown: &CancellationToken,
    ) -> Result<RunOutcome> {
        let started = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = self.start(spec) => Some(result),
        };

        let outcome = match started {
            Some(Ok(())) => self.wait(shutdown).await,
            Some(Err(e)) => return Err(e),
            None => {
                info!("Shutdown requested while the PT was starting");
                Ok(RunOutcome::ShutdownRequested)
            }
        };

        match &outcome {
            Ok(RunOutcome::ProcessExited(status)) => {
                warn!("PT exited unexpectedly: {}", status)
            }
            Ok(RunOutcome::ShutdownRequested) => info!("Received shutdown request"),
            Err(e) => error!("PT failed while running: {}", e),
        }

        info!("Terminating");
        let stopped = self.terminate().await;
        self.state = SupervisorState::Terminated;

        match (outcome, stopped) {
            (Err(e), Err(stop_err)) => {
                error!("Failed to terminate PT: {}", stop_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(stop_err)) => Err(stop_err),
            (Ok(outcome), Ok(())) => Ok(outcome),
        }
    }
}

impl<A: TransportAdapter> Drop for LifecycleSupervisor<A> {
    fn drop(&mut self) {
        if self.process.is_some() {
            warn!("Supervisor dropped with a live PT; releasing its handle");
        }
    }
}
