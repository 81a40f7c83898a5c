//! # Termination signals.
//!
//! [`ShutdownSignals`] registers the process-level signals that stop a running
//! [`Host`](crate::Host) and reports which one arrived, so the host can put the
//! name in its `ShutdownRequested` reason.
//!
//! Unix listens for `SIGINT`, `SIGTERM` and `SIGQUIT`; other platforms only for Ctrl-C.

use crate::error::RuntimeError;

fn registration_failed(e: std::io::Error) -> RuntimeError {
    RuntimeError::Signal {
        error: e.to_string(),
    }
}

/// Registered termination signal listeners.
#[cfg(unix)]
pub(crate) struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    /// Installs the listeners. Signals delivered after this call are not lost.
    pub(crate) fn register() -> Result<Self, RuntimeError> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(registration_failed)?,
            terminate: signal(SignalKind::terminate()).map_err(registration_failed)?,
            quit: signal(SignalKind::quit()).map_err(registration_failed)?,
        })
    }

    /// Resolves with the name of the first signal received.
    pub(crate) async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.quit.recv() => "SIGQUIT",
        }
    }
}

/// Registered termination signal listeners.
#[cfg(not(unix))]
pub(crate) struct ShutdownSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl ShutdownSignals {
    /// Installs the listeners. Signals delivered after this call are not lost.
    pub(crate) fn register() -> Result<Self, RuntimeError> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c().map_err(registration_failed)?,
        })
    }

    /// Resolves with the name of the first signal received.
    pub(crate) async fn recv(&mut self) -> &'static str {
        self.ctrl_c.recv().await;
        "Ctrl-C"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reports_received_signal_name() {
        let mut signals = ShutdownSignals::register().unwrap();

        let status = tokio::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let name = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .unwrap();
        assert_eq!(name, "SIGTERM");
    }
}
