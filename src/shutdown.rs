//! Shutdown signal handling

use tokio::select;
use tracing::{info, warn};

/// Resolve once the process is asked to stop.
///
/// Listens for Ctrl+C everywhere and SIGTERM on unix. A signal that cannot be
/// installed is logged and ignored, so the other one still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = ctrl_c => (),
        _ = terminate => (),
    }

    info!("Shutdown signal detected. Attempting graceful shutdown...");
}
