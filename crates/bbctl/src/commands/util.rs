//! Shared helpers for command handlers.

use std::path::Path;

use bbctl_core::Registration;
use tracing::warn;

use crate::error::CliError;

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Failed to listen for Ctrl+C");
                            std::future::pending::<()>().await;
                        }
                    }
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                wait_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    wait_ctrl_c().await;

    // Keep log output off the line the terminal echoed ^C onto.
    eprintln!();
}

async fn wait_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Load the registration and check it points at a local HTTP server.
pub fn load_registration(path: &Path) -> Result<Registration, CliError> {
    let registration = Registration::load(path)?;
    registration.local_url()?;
    Ok(registration)
}
