//! Signal handling for a backup run.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels the returned token: the
//! scheduler stops dispatching and in-flight transfers drop their partial
//! files. A second signal exits immediately with status 130.

use tokio_util::sync::CancellationToken;

const FORCE_EXIT_STATUS: i32 = 130;

/// Signal streams, opened before the listener task starts.
struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Signals {
    fn open() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next signal and return its name, or `None` if signals
    /// can no longer be received.
    async fn next(&mut self) -> Option<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                r = tokio::signal::ctrl_c() => r.ok().map(|()| "SIGINT"),
                s = self.terminate.recv() => s.map(|()| "SIGTERM"),
                s = self.hangup.recv() => s.map(|()| "SIGHUP"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok().map(|()| "Ctrl+C")
        }
    }
}

/// Start listening for shutdown signals. Fails only if the signal streams
/// cannot be registered.
pub(crate) fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let mut signals = Signals::open()?;
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let mut received = 0u32;
        while let Some(name) = signals.next().await {
            received += 1;
            if received > 1 {
                tracing::warn!("{} received again, exiting now", name);
                std::process::exit(FORCE_EXIT_STATUS);
            }
            tracing::info!(
                "{} received, stopping the backup (signal again to force exit)",
                name
            );
            cancel.cancel();
        }
        tracing::debug!("signal listener closed");
    });

    Ok(token)
}
