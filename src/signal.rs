//! Shutdown signal handling.

use tracing::info;

/// Wait until the process receives SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => info!(signal = "SIGINT", "Shutdown signal received"),
        _ = sigterm.recv() => info!(signal = "SIGTERM", "Shutdown signal received"),
    }
}

/// Fallback for non-unix targets: ctrl-c only.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
