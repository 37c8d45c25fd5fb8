//! Cooperative cancellation on SIGINT/SIGTERM.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;

/// Completes when a shutdown signal is received.
pub async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => info!(signal = "SIGINT", "shutdown signal"),
            _ = sigterm.recv() => info!(signal = "SIGTERM", "shutdown signal"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal");
    }

    Ok(())
}

/// Returns a token that is cancelled when the process is asked to stop.
/// Running statements are abandoned and their transactions rolled back.
pub fn cancel_on_shutdown() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => {
                warn!("cancelling in-flight refreshes");
                trigger.cancel();
            }
            Err(e) => warn!("unable to install signal handlers: {}", e),
        }
    });
    token
}
