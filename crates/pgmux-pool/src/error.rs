//! Pool error types.

use pgmux_fiber::{ConnectError, FiberError};
use thiserror::Error;

use crate::server::ServerKey;

/// Errors that can occur when working with a server pool or route.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No idle server and the pool is at capacity.
    #[error("pool is full")]
    PoolFull,

    /// Waited `pool_timeout` without a server becoming available.
    #[error("timed out waiting for a server")]
    Timeout,

    /// The waiting fiber was cancelled.
    #[error("checkout cancelled")]
    Cancelled,

    /// The server is not checked out.
    #[error("server {0:?} is not active")]
    NotActive(ServerKey),

    /// The server is not idle.
    #[error("server {0:?} is not idle")]
    NotIdle(ServerKey),

    /// The key does not belong to this pool.
    #[error("unknown server {0:?}")]
    UnknownServer(ServerKey),

    /// Connecting a new backend failed.
    #[error("backend connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// Route configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The backend host could not be resolved to an address.
    #[error("cannot resolve backend {host}:{port}")]
    Resolve {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
    },

    /// Scheduler misuse.
    #[error(transparent)]
    Fiber(#[from] FiberError),
}

impl PoolError {
    /// Check if this error is transient and the checkout may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PoolFull | Self::Timeout => true,
            Self::Connect(e) => !matches!(
                e,
                ConnectError::AlreadyConnecting
                    | ConnectError::AlreadyConnected
                    | ConnectError::Closed
                    | ConnectError::Fiber(_)
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PoolError::PoolFull.is_transient());
        assert!(PoolError::Timeout.is_transient());
        assert!(PoolError::Connect(ConnectError::TimedOut).is_transient());
        assert!(!PoolError::Connect(ConnectError::AlreadyConnecting).is_transient());
        assert!(!PoolError::Config("pool_size".into()).is_transient());
        assert!(!PoolError::Cancelled.is_transient());
    }
}
