//! Boundary between the lifecycle supervisor and whatever actually runs the PT.
//!
//! The supervisor only talks to these traits, which keeps the PT control
//! protocol out of the supervision logic and lets tests substitute an
//! in-memory adapter.

use crate::config::ServerLaunchSpec;
use crate::error::Result;
use crate::process::types::{FailedTransport, LiveTransport};
use async_trait::async_trait;
use std::process::ExitStatus;

/// Handle to a running PT subprocess
///
/// Dropping a handle without calling [`terminate`](Self::terminate) must
/// still stop the subprocess, so an abandoned supervisor cannot leave it
/// running.
#[async_trait]
pub trait SupervisedProcess: Send {
    /// OS process id, if the handle wraps a real process
    fn pid(&self) -> Option<u32>;

    /// Transports the PT reported as bound
    fn live_transports(&self) -> &[LiveTransport];

    /// Transports the PT reported as failed
    fn failed_transports(&self) -> &[FailedTransport] {
        &[]
    }

    /// Block until the subprocess exits
    ///
    /// # Returns
    /// * `Ok(ExitStatus)` - The subprocess exited
    /// * `Err(PtError::RuntimeFailure)` - Waiting on the subprocess failed
    async fn wait(&mut self) -> Result<ExitStatus>;

    /// Ask the subprocess to stop and wait until it is gone
    ///
    /// Must succeed without doing anything when the subprocess already exited.
    async fn terminate(&mut self) -> Result<()>;
}

/// Launches a PT from a [`ServerLaunchSpec`]
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    type Process: SupervisedProcess;

    /// Spawn the PT and wait for it to report which transports are live
    ///
    /// On error no subprocess is left running.
    async fn start(&self, spec: &ServerLaunchSpec) -> Result<Self::Process>;
}
