//! Server error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while starting or running the relay server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The bound listener's address could not be read.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),

    /// `axum::serve` stopped with an error.
    #[error("server on {addr} failed: {source}")]
    Serve {
        /// Address the server was listening on.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The global metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    MetricsRecorder(String),
}
