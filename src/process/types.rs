use serde::Serialize;
use std::process::ExitStatus;

/// Lifecycle state of the supervised PT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Stopping => write!(f, "stopping"),
            SupervisorState::Terminated => write!(f, "terminated"),
        }
    }
}

/// A transport the PT reported as listening
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveTransport {
    pub name: String,
    /// Address the PT actually bound
    pub address: String,
    /// Extra arguments reported by the PT (e.g. `ARGS:cert=...`)
    pub args: Option<String>,
}

/// A transport the PT refused to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTransport {
    pub name: String,
    pub message: String,
}

/// How a supervised run ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The PT exited on its own
    ProcessExited(ExitStatus),
    /// SIGINT / SIGTERM (or a cancelled token) asked for shutdown
    ShutdownRequested,
}

impl RunOutcome {
    /// Process exit code reported by the CLI
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::ShutdownRequested => 0,
            RunOutcome::ProcessExited(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SupervisorState::Idle.to_string(), "idle");
        assert_eq!(SupervisorState::Running.to_string(), "running");
        assert_eq!(SupervisorState::Terminated.to_string(), "terminated");
    }

    #[cfg(unix)]
    #[test]
    fn test_outcome_exit_codes() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(RunOutcome::ShutdownRequested.exit_code(), 0);
        let status = ExitStatus::from_raw(0);
        assert_eq!(RunOutcome::ProcessExited(status).exit_code(), 1);
    }
}
