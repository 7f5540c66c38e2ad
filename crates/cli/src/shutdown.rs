use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Turns SIGINT and SIGTERM into cancellation of the running sync. The sync
/// notices at its next stream or partition boundary and exits with its state
/// flushed.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    cancel_token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handlers(&self) {
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move {
            let name = wait_for_signal().await;
            info!(signal = name, "Shutdown requested, stopping at the next partition boundary");
            cancel_token.cancel();
        });
    }

    /// Only signals cancel the token, so a cancelled token means a signal
    /// arrived.
    pub fn is_shutdown_requested(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// Resolves with the name of the first termination signal received. A
/// handler that cannot be installed never resolves.
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(err) => {
                error!("Failed to install SIGINT handler: {err}");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM"
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {err}");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    }
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    /// Config, API, state or stream failures.
    GeneralError = 1,
    /// 128 + SIGINT, as shells report it.
    ShutdownRequested = 130,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
