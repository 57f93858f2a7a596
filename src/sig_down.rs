//! SIGINT/SIGTERM handling.
//!
//! [`SigDown`] listens for termination signals on a background task and cancels a shared
//! [`CancellationToken`] when one arrives. The executor checks the token before each submission.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

pub struct SigDown {
    token: CancellationToken,
}

impl SigDown {
    /// Installs the signal handlers. Must be called inside a Tokio runtime.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let token = CancellationToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => tracing::warn!("SIGINT received, stopping after the current operation"),
                _ = sigterm.recv() => tracing::warn!("SIGTERM received, stopping after the current operation"),
                _ = trigger.cancelled() => return,
            }
            trigger.cancel();
        });

        Ok(Self { token })
    }

    /// A clone of the shared token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}
