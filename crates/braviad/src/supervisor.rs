//! Watches device tasks so that one failing TV never takes the others down.

use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;

/// How a device task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Stopped,
    Failed,
    Panicked,
    Cancelled,
}

/// Wait for a device task and report how it ended.
///
/// Errors and panics are logged under a `[PROCESS]` banner; they are not
/// propagated, so the remaining devices keep running.
pub async fn supervise(host: String, handle: JoinHandle<anyhow::Result<()>>) -> Exit {
    match handle.await {
        Ok(Ok(())) => {
            info!("[{}] Device task finished", host);
            Exit::Stopped
        }
        Ok(Err(e)) => {
            error!("[PROCESS] Device {} stopped with an error: {:#}", host, e);
            Exit::Failed
        }
        Err(e) if e.is_panic() => {
            error!("[PROCESS] Device {} panicked", host);
            error!("- - - - - - - - - - - - - - - - - - -");
            error!("{}", e);
            Exit::Panicked
        }
        Err(e) => {
            error!("[PROCESS] Device {} task was cancelled: {}", host, e);
            Exit::Cancelled
        }
    }
}
