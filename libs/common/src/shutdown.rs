//! Graceful shutdown signal handling

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for Ctrl+C, or SIGTERM on Unix
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Only Ctrl+C will stop the service",
                    e
                );
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                match term_signal {
                    Some(mut sig) => { sig.recv().await; },
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Token cancelled once a shutdown signal arrives
///
/// Must be called from within a tokio runtime.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received");
                child.cancel();
            },
            _ = child.cancelled() => {},
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_can_be_cancelled_manually() {
        let token = shutdown_token();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }
}
