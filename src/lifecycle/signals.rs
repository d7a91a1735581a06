//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (all platforms) or SIGTERM (unix)
//! - Translate the first signal into a graceful shutdown request
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Registration failures are logged and that signal source is ignored

/// Resolve when the process is asked to terminate.
pub async fn terminate_requested() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(signal = "SIGINT", "Shutdown requested"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "Shutdown requested"),
    }
}
