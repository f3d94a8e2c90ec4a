//! Turns SIGINT / SIGTERM into a cooperative shutdown request.
//!
//! The listener task never touches the PT. It only cancels a token; the
//! supervisor sees the cancellation inside its wait and runs the normal
//! termination path.

use crate::error::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Source of shutdown signals
#[async_trait]
trait SignalSource: Send {
    /// Name of the next delivered signal, or `None` once no more can arrive
    async fn recv(&mut self) -> Option<&'static str>;
}

#[cfg(unix)]
struct UnixSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
#[async_trait]
impl SignalSource for UnixSignals {
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            sig = self.sigterm.recv() => sig.map(|()| "SIGTERM"),
            sig = self.sigint.recv() => sig.map(|()| "SIGINT"),
        }
    }
}

#[cfg(not(unix))]
struct CtrlC;

#[cfg(not(unix))]
#[async_trait]
impl SignalSource for CtrlC {
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|()| "Ctrl-C")
    }
}

/// Cancel `trigger` on every delivered signal until the source closes
async fn relay<S: SignalSource>(mut source: S, trigger: CancellationToken) {
    while let Some(name) = source.recv().await {
        if trigger.is_cancelled() {
            debug!("Received {} while already shutting down", name);
        } else {
            info!("Received {}, shutting down", name);
            trigger.cancel();
        }
    }

    debug!("Signal stream closed, no longer listening for shutdown signals");
}

/// Process-wide shutdown signal registration
pub struct SignalBridge {
    token: CancellationToken,
    listener: JoinHandle<()>,
}

impl SignalBridge {
    /// Register the signal handlers and start listening
    ///
    /// Must be called from inside a tokio runtime. Handlers are registered
    /// before this returns, so a signal delivered afterwards is never lost.
    #[cfg(unix)]
    pub fn install() -> Result<Self> {
        use crate::error::PtError;
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate()).map_err(|e| {
            PtError::SignalError(format!("Failed to set up SIGTERM handler: {}", e))
        })?;
        let sigint = signal(SignalKind::interrupt()).map_err(|e| {
            PtError::SignalError(format!("Failed to set up SIGINT handler: {}", e))
        })?;

        Ok(Self::listen(UnixSignals { sigterm, sigint }))
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self> {
        Ok(Self::listen(CtrlC))
    }

    fn listen<S: SignalSource + 'static>(source: S) -> Self {
        let token = CancellationToken::new();
        let listener = tokio::spawn(relay(source, token.clone()));

        Self { token, listener }
    }

    /// Token cancelled when a shutdown signal arrives
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
