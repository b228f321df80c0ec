//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Every session token is a child of the coordinator's token, so one
//! cancel closes all sockets with a normal close frame and lets
//! `axum::serve` drain.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time allowed for the server task to drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown of the server and its sessions.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the root cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Token for one connection; cancelled with the root.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel everything and wait up to `timeout` for `server` to finish.
    ///
    /// Returns `false` if the task had to be aborted.
    pub async fn graceful_shutdown(&self, server: JoinHandle<()>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let abort = server.abort_handle();
        if tokio::time::timeout(timeout, server).await.is_ok() {
            info!("server drained");
            true
        } else {
            warn!(?timeout, "shutdown timed out, aborting server task");
            abort.abort();
            false
        }
    }
}
