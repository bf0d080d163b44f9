//! Signal handling for graceful shutdown.

use tokio::signal;
use tracing::info;

/// Waits for a termination signal (SIGINT or SIGTERM on Unix, Ctrl+C
/// elsewhere).
pub async fn wait_for_shutdown() -> Result<(), Box<dyn std::error::Error>> {
    wait_for_shutdown_silent().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    Ok(())
}

pub async fn wait_for_shutdown_silent() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    Ok(())
}
