//! Scheduler and connect error types.

use std::io;

use thiserror::Error;

/// Errors raised by the fiber scheduler.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FiberError {
    /// A fiber-only operation was called outside of any fiber.
    #[error("not running inside a fiber")]
    NotInFiber,

    /// A cancellation operation is already registered for this fiber.
    #[error("fiber already has an operation in progress")]
    OperationInProgress,

    /// The fiber was cancelled while waiting.
    #[error("fiber cancelled")]
    Cancelled,

    /// `run` was called while the scheduler was already running.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// Fibers are suspended but nothing can ever wake them.
    #[error("scheduler stalled with {suspended} suspended fiber(s) and no pending events")]
    Stalled {
        /// Number of fibers left suspended.
        suspended: usize,
    },

    /// The platform event loop failed.
    #[error("platform error: {0}")]
    Platform(#[from] io::Error),
}

/// Errors returned by [`Io::connect`](crate::Io::connect).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// Another connect on the same handle is still outstanding.
    #[error("connect already in progress on this handle")]
    AlreadyConnecting,

    /// The handle is already connected.
    #[error("handle is already connected")]
    AlreadyConnected,

    /// The handle was closed and cannot be reused.
    #[error("handle is closed")]
    Closed,

    /// The calling fiber was cancelled before or during the attempt.
    #[error("connect cancelled")]
    Cancelled,

    /// The deadline elapsed before the connection was established.
    #[error("connect timed out")]
    TimedOut,

    /// The platform reported a connect error.
    #[error("connect failed: {0}")]
    Failed(io::ErrorKind),

    /// Scheduler misuse.
    #[error(transparent)]
    Fiber(#[from] FiberError),
}

impl ConnectError {
    /// Check if this error was caused by the connect deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Check if this error was caused by cancellation of the calling fiber.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_classification() {
        assert!(ConnectError::TimedOut.is_timeout());
        assert!(!ConnectError::Failed(io::ErrorKind::ConnectionRefused).is_timeout());
        assert!(ConnectError::Cancelled.is_cancelled());
        assert!(!ConnectError::TimedOut.is_cancelled());
    }

    #[test]
    fn test_error_messages() {
        let err = ConnectError::Failed(io::ErrorKind::ConnectionRefused);
        assert!(err.to_string().starts_with("connect failed"));

        let err = FiberError::Stalled { suspended: 3 };
        assert!(err.to_string().contains("3 suspended"));
    }
}
