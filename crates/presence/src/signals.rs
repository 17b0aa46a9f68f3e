//! Shutdown signal handling.
//!
//! The relay keeps serving until the process is asked to stop; this module
//! turns that request into a future the application can select on.

use tokio::signal;
use tracing::info;

/// Resolves once the process receives a termination request.
///
/// Live connections are still open when this returns; the caller is expected
/// to shut the relay down, which terminates every client.
///
/// # Platform Support
///
/// * **Unix platforms**: SIGINT (Ctrl+C in a terminal) and SIGTERM (container
///   or service manager stop)
/// * **Windows**: Ctrl+C only
///
/// # Returns
///
/// `Ok(())` once a signal arrives, or an error if a handler could not be
/// registered.
pub async fn setup_signal_handlers() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("📡 Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("📡 Received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("📡 Received Ctrl+C");
    }

    Ok(())
}
